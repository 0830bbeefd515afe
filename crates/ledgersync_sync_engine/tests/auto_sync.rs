//! The tokio driver: triggers, debounce, backoff and the attempt bound.

use ledgersync_core::{EntityStore, NewAccount, NewTransaction};
use ledgersync_protocol::LineItem;
use ledgersync_sync_engine::{
    AutoSync, Connectivity, ConnectivityMonitor, MockTransport, RetryConfig, StoreApplier,
    SyncConfig, SyncEngine, SyncEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

type Engine = SyncEngine<MockTransport, StoreApplier>;

fn engine(retry: RetryConfig) -> Arc<Engine> {
    let config = SyncConfig::new("till-1", "mock://")
        .with_retry(retry)
        .with_debounce(Duration::from_millis(40));
    let applier = StoreApplier::new(Arc::new(EntityStore::open_in_memory().unwrap()));
    Arc::new(SyncEngine::new(config, MockTransport::new(), applier))
}

fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig::new(attempts)
        .with_initial_delay(Duration::from_millis(5))
        .with_jitter(false)
}

fn sale(engine: &Engine) {
    let books = engine.applier().books();
    let account = books.create_account(NewAccount::new("Ravi")).unwrap().client_id;
    books
        .create_transaction(NewTransaction::new(account, vec![LineItem::new("rice", 1, 1000)]))
        .unwrap();
}

async fn next(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no sync event")
        .unwrap()
}

async fn quiet(rx: &mut broadcast::Receiver<SyncEvent>, wait: Duration) -> bool {
    timeout(wait, rx.recv()).await.is_err()
}

#[tokio::test]
async fn manual_trigger_runs_once() {
    let engine = engine(RetryConfig::no_retry());
    sale(&engine);
    let monitor = ConnectivityMonitor::new(Connectivity::Online);
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    assert!(auto.trigger());
    match next(&mut events).await {
        SyncEvent::Completed(report) => assert_eq!(report.synced, 3),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(quiet(&mut events, Duration::from_millis(50)).await);
    auto.shutdown().await;
}

#[tokio::test]
async fn reconnect_starts_a_run() {
    let engine = engine(RetryConfig::no_retry());
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    sale(&engine);
    auto.local_change();
    assert!(quiet(&mut events, Duration::from_millis(100)).await);
    assert!(engine.transport().pushed().is_empty());

    monitor.set_online(true);
    match next(&mut events).await {
        SyncEvent::Completed(report) => assert_eq!(report.pushed, 3),
        other => panic!("unexpected event {other:?}"),
    }
    auto.shutdown().await;
}

#[tokio::test]
async fn local_changes_are_debounced_into_one_run() {
    let engine = engine(RetryConfig::no_retry());
    let monitor = ConnectivityMonitor::default();
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    for _ in 0..3 {
        sale(&engine);
        auto.local_change();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    match next(&mut events).await {
        SyncEvent::Completed(report) => assert_eq!(report.pushed, 9),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(quiet(&mut events, Duration::from_millis(120)).await);
    assert_eq!(engine.transport().pushed().len(), 1);
    auto.shutdown().await;
}

#[tokio::test]
async fn backoff_stops_at_the_attempt_bound() {
    let engine = engine(fast_retry(3));
    sale(&engine);
    engine.transport().fail_next(10);
    let monitor = ConnectivityMonitor::default();
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    auto.trigger();
    for attempt in 1..=2 {
        match next(&mut events).await {
            SyncEvent::Failed {
                attempt: seen,
                retry_in,
                ..
            } => {
                assert_eq!(seen, attempt);
                assert!(retry_in.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    match next(&mut events).await {
        SyncEvent::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(quiet(&mut events, Duration::from_millis(80)).await);
    assert!(engine.stats().retries_exhausted);
    assert_eq!(engine.stats().retries, 2);
    assert_eq!(engine.sync_status().unwrap().pending.records(), 3);
    auto.shutdown().await;
}

#[tokio::test]
async fn manual_trigger_restarts_after_exhaustion() {
    let engine = engine(fast_retry(2));
    sale(&engine);
    engine.transport().fail_next(2);
    let monitor = ConnectivityMonitor::default();
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    auto.trigger();
    assert!(matches!(next(&mut events).await, SyncEvent::Failed { .. }));
    assert!(matches!(
        next(&mut events).await,
        SyncEvent::RetriesExhausted { .. }
    ));

    auto.trigger();
    assert!(matches!(next(&mut events).await, SyncEvent::Completed(_)));
    assert!(!engine.stats().retries_exhausted);
    assert!(engine.sync_status().unwrap().pending.is_empty());
    auto.shutdown().await;
}

#[tokio::test]
async fn local_change_waits_for_manual_trigger_after_exhaustion() {
    let engine = engine(fast_retry(2));
    sale(&engine);
    engine.transport().fail_next(2);
    let monitor = ConnectivityMonitor::default();
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    auto.trigger();
    assert!(matches!(next(&mut events).await, SyncEvent::Failed { .. }));
    assert!(matches!(
        next(&mut events).await,
        SyncEvent::RetriesExhausted { .. }
    ));

    sale(&engine);
    assert!(auto.local_change());
    assert!(quiet(&mut events, Duration::from_millis(120)).await);
    assert_eq!(engine.transport().pushed().len(), 2);

    auto.trigger();
    match next(&mut events).await {
        SyncEvent::Completed(report) => assert_eq!(report.pushed, 6),
        other => panic!("unexpected event {other:?}"),
    }
    auto.shutdown().await;
}

#[tokio::test]
async fn going_offline_cancels_a_pending_retry() {
    let engine = engine(
        RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(60))
            .with_jitter(false),
    );
    sale(&engine);
    engine.transport().fail_next(1);
    let monitor = ConnectivityMonitor::default();
    let auto = AutoSync::spawn(Arc::clone(&engine), &monitor);
    let mut events = auto.subscribe();

    auto.trigger();
    assert!(matches!(next(&mut events).await, SyncEvent::Failed { .. }));
    monitor.set_online(false);
    assert!(quiet(&mut events, Duration::from_millis(150)).await);
    assert_eq!(engine.transport().pushed().len(), 1);

    monitor.set_online(true);
    assert!(matches!(next(&mut events).await, SyncEvent::Completed(_)));
    auto.shutdown().await;
}
