//! Automatic sync driver.
//!
//! Runs the engine on a blocking thread whenever connectivity comes back,
//! a manual trigger arrives, or local changes settle while online. Failed
//! runs are retried with backoff until the attempt bound, after which only
//! a manual trigger or a reconnect starts the next run.

use crate::applier::SyncApplier;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::state::{SyncEngine, SyncReport};
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Someone asked for a sync; resets the retry budget.
    Manual,
    /// A local write happened; debounced.
    LocalChange,
}

/// Outcome of an automatic run, broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The run completed.
    Completed(SyncReport),
    /// The run failed.
    Failed {
        /// Error text.
        error: String,
        /// Consecutive failures so far.
        attempt: u32,
        /// When the next automatic attempt happens, if any.
        retry_in: Option<Duration>,
    },
    /// The retry bound was reached; automatic retries stop.
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last error text.
        error: String,
    },
}

/// Handle to a running driver. Must be created inside a Tokio runtime.
pub struct AutoSync {
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl AutoSync {
    /// Starts the driver. No run happens until the first trigger or
    /// connectivity transition.
    pub fn spawn<T, A>(engine: Arc<SyncEngine<T, A>>, monitor: &ConnectivityMonitor) -> Self
    where
        T: SyncTransport + 'static,
        A: SyncApplier + 'static,
    {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let driver = Driver {
            engine,
            connectivity: monitor.subscribe(),
            monitor_alive: true,
            triggers: trigger_rx,
            events: events.clone(),
            failures: 0,
            exhausted: false,
            retry_at: None,
            debounce_at: None,
        };
        let task = tokio::spawn(driver.run());
        Self {
            triggers,
            events,
            task,
        }
    }

    /// Requests a run now. Returns false if the driver has stopped.
    pub fn trigger(&self) -> bool {
        self.triggers.send(SyncTrigger::Manual).is_ok()
    }

    /// Reports a local write.
    pub fn local_change(&self) -> bool {
        self.triggers.send(SyncTrigger::LocalChange).is_ok()
    }

    /// Subscribes to run outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stops the driver after any run in progress.
    pub async fn shutdown(self) {
        let AutoSync { triggers, task, .. } = self;
        drop(triggers);
        if let Err(e) = task.await {
            warn!(error = %e, "auto-sync task ended abnormally");
        }
    }
}

struct Driver<T: SyncTransport, A: SyncApplier> {
    engine: Arc<SyncEngine<T, A>>,
    connectivity: watch::Receiver<Connectivity>,
    monitor_alive: bool,
    triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    events: broadcast::Sender<SyncEvent>,
    failures: u32,
    exhausted: bool,
    retry_at: Option<Instant>,
    debounce_at: Option<Instant>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T, A> Driver<T, A>
where
    T: SyncTransport + 'static,
    A: SyncApplier + 'static,
{
    fn online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }

    async fn run(mut self) {
        debug!("auto-sync started");
        loop {
            let online = self.online();
            tokio::select! {
                changed = self.connectivity.changed(), if self.monitor_alive => {
                    if changed.is_err() {
                        self.monitor_alive = false;
                        continue;
                    }
                    let restored = self.connectivity.borrow_and_update().is_online();
                    if restored {
                        info!("connectivity restored, syncing");
                        self.reset_budget();
                        self.run_and_drain().await;
                    } else {
                        self.retry_at = None;
                        self.debounce_at = None;
                    }
                }
                trigger = self.triggers.recv() => match trigger {
                    None => break,
                    Some(SyncTrigger::Manual) => {
                        self.reset_budget();
                        self.run_and_drain().await;
                    }
                    Some(SyncTrigger::LocalChange) => self.schedule_debounce(online),
                },
                () = sleep_until(self.retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    if online {
                        self.engine.note_retry();
                        self.run_and_drain().await;
                    }
                }
                () = sleep_until(self.debounce_at), if self.debounce_at.is_some() => {
                    self.debounce_at = None;
                    if online && !self.exhausted {
                        self.run_and_drain().await;
                    }
                }
            }
        }
        debug!("auto-sync stopped");
    }

    fn reset_budget(&mut self) {
        self.failures = 0;
        self.exhausted = false;
        self.retry_at = None;
    }

    /// Local changes start no run while offline or once retries are
    /// exhausted; a manual trigger or reconnect restores them.
    fn schedule_debounce(&mut self, online: bool) {
        if online && !self.exhausted {
            self.debounce_at = Some(Instant::now() + self.engine.config().debounce);
        }
    }

    /// Runs, then folds every trigger that queued up meanwhile into at most
    /// one more run.
    async fn run_and_drain(&mut self) {
        loop {
            self.run_once().await;
            let mut manual = false;
            while let Ok(trigger) = self.triggers.try_recv() {
                match trigger {
                    SyncTrigger::Manual => manual = true,
                    SyncTrigger::LocalChange => {
                        let online = self.online();
                        self.schedule_debounce(online);
                    }
                }
            }
            if !manual {
                break;
            }
            self.reset_budget();
        }
    }

    async fn run_once(&mut self) {
        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || engine.sync()).await {
            Ok(Ok(report)) => {
                self.failures = 0;
                self.exhausted = false;
                self.retry_at = None;
                let _ = self.events.send(SyncEvent::Completed(report));
            }
            Ok(Err(e)) => self.on_failure(e.to_string(), e.is_retryable()),
            Err(e) => self.on_failure(format!("sync task failed: {e}"), false),
        }
    }

    fn on_failure(&mut self, error: String, retryable: bool) {
        if !retryable || self.exhausted {
            let _ = self.events.send(SyncEvent::Failed {
                error,
                attempt: self.failures,
                retry_in: None,
            });
            return;
        }

        self.failures += 1;
        let retry = &self.engine.config().retry;
        if self.failures >= retry.max_attempts.max(1) {
            self.exhausted = true;
            self.retry_at = None;
            self.engine.mark_exhausted(self.failures);
            let _ = self.events.send(SyncEvent::RetriesExhausted {
                attempts: self.failures,
                error,
            });
            return;
        }

        let delay = retry.delay_for_attempt(self.failures);
        debug!(attempt = self.failures, ?delay, "scheduling retry");
        self.retry_at = Some(Instant::now() + delay);
        let _ = self.events.send(SyncEvent::Failed {
            error,
            attempt: self.failures,
            retry_in: Some(delay),
        });
    }
}
