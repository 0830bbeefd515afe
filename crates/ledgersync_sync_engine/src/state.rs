//! Sync engine state machine.

use crate::applier::{PendingSummary, SyncApplier};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::notify::{LogNotifier, Notifier};
use crate::transport::SyncTransport;
use ledgersync_protocol::{BatchResponse, ClientId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Taking the snapshot of pending records.
    Collecting,
    /// Waiting on the transport.
    Sending,
    /// Applying the reconciler's response locally.
    Applying,
    /// The last run failed; the engine is idle again.
    Failed,
    /// Waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Collecting | SyncState::Sending | SyncState::Applying
        )
    }

    /// Returns true if the engine can start a new run.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Failed | SyncState::RetryWait)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that completed, empty ones included.
    pub runs_completed: u64,
    /// Records sent over all runs.
    pub records_pushed: u64,
    /// Records the reconciler rejected.
    pub records_rejected: u64,
    /// Failed runs.
    pub failures: u64,
    /// Retries performed.
    pub retries: u64,
    /// Notifications dispatched.
    pub notifications_sent: u64,
    /// Notifications that failed and wait for the next run.
    pub notification_failures: u64,
    /// Last successful run.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Set when automatic retries gave up; cleared by the next success.
    pub retries_exhausted: bool,
}

/// Result of one call to [`SyncEngine::sync`].
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Records sent.
    pub pushed: usize,
    /// Records marked synced.
    pub synced: usize,
    /// Records rejected by the reconciler.
    pub rejected: usize,
    /// Records edited while in flight.
    pub changed_in_flight: usize,
    /// Outbox items cleared.
    pub outbox_cleared: usize,
    /// Notifications dispatched.
    pub notified: usize,
    /// Per-record errors from the reconciler.
    pub errors: Vec<String>,
    /// Runs performed, reruns included.
    pub runs: u32,
    /// True if another run was in flight and this request was folded into it.
    pub coalesced: bool,
    /// Wall time.
    pub duration: Duration,
}

impl SyncReport {
    fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    /// Returns true if the run sent nothing.
    pub fn is_noop(&self) -> bool {
        self.pushed == 0 && self.outbox_cleared == 0
    }

    fn absorb(&mut self, other: SyncReport) {
        self.pushed += other.pushed;
        self.synced += other.synced;
        self.rejected += other.rejected;
        self.changed_in_flight += other.changed_in_flight;
        self.outbox_cleared += other.outbox_cleared;
        self.notified += other.notified;
        self.errors.extend(other.errors);
        self.runs += other.runs;
    }
}

/// Engine state plus what is still waiting for the remote.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current state.
    pub state: SyncState,
    /// Pending work.
    pub pending: PendingSummary,
    /// Whether the transport reports a connection.
    pub online: bool,
    /// Counters.
    pub stats: SyncStats,
}

/// The sync engine pushes local changes to the reconciler.
pub struct SyncEngine<T: SyncTransport, A: SyncApplier> {
    config: SyncConfig,
    transport: Arc<T>,
    applier: Arc<A>,
    notifier: Arc<dyn Notifier>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    running: Mutex<()>,
    rerun_requested: AtomicBool,
    cancelled: AtomicBool,
}

impl<T: SyncTransport, A: SyncApplier> SyncEngine<T, A> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, applier: A) -> Self {
        Self::with_shared(config, Arc::new(transport), Arc::new(applier))
    }

    /// Creates an engine over a shared transport and applier.
    pub fn with_shared(config: SyncConfig, transport: Arc<T>, applier: Arc<A>) -> Self {
        Self {
            config,
            transport,
            applier,
            notifier: Arc::new(LogNotifier),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            running: Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Replaces the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The applier.
    pub fn applier(&self) -> &Arc<A> {
        &self.applier
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// State, pending work and counters.
    pub fn sync_status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            state: self.state(),
            pending: self.applier.pending_summary()?,
            online: self.transport.is_connected(),
            stats: self.stats(),
        })
    }

    /// Cancels the run in progress at its next phase boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(device = %self.config.device_id, from = ?previous, to = ?state, "sync state");
        }
    }

    /// Runs the state machine once, then again for every request that
    /// arrived meanwhile.
    ///
    /// If a run is already in flight on another thread this returns at once
    /// with a coalesced report; the running call picks the request up.
    /// A run that fails while a request is pending is followed by one more
    /// run, and the call returns the outcome of the last run.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();
        let mut holder = false;
        loop {
            let Some(running) = self.running.try_lock() else {
                if holder {
                    // whoever took the guard snapshots after our release
                    break;
                }
                self.rerun_requested.store(true, Ordering::SeqCst);
                debug!(device = %self.config.device_id, "sync already running, coalesced");
                return Ok(SyncReport::coalesced());
            };
            if !holder {
                self.cancelled.store(false, Ordering::SeqCst);
                holder = true;
            }
            self.rerun_requested.store(false, Ordering::SeqCst);

            let outcome = self.run_until_quiet(&mut report);
            drop(running);
            outcome?;

            // a request may have landed between the last check and the release
            if !self.rerun_requested.load(Ordering::SeqCst) {
                break;
            }
        }
        report.duration = start.elapsed();
        Ok(report)
    }

    fn run_until_quiet(&self, report: &mut SyncReport) -> SyncResult<()> {
        loop {
            match self.run_once() {
                Ok(run) => report.absorb(run),
                Err(e) => {
                    self.handle_error(&e);
                    let pending = !matches!(e, SyncError::Cancelled)
                        && self.rerun_requested.swap(false, Ordering::SeqCst);
                    if !pending {
                        return Err(e);
                    }
                    debug!(device = %self.config.device_id, error = %e, "run failed, running again for a coalesced request");
                    continue;
                }
            }
            if !self.rerun_requested.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            debug!(device = %self.config.device_id, "running again for a coalesced request");
        }
    }

    fn run_once(&self) -> SyncResult<SyncReport> {
        self.set_state(SyncState::Collecting);
        let snapshot = self.applier.collect()?;
        let mut report = SyncReport {
            runs: 1,
            ..SyncReport::default()
        };

        if snapshot.is_empty() {
            self.finish(&report);
            return Ok(report);
        }

        let response = if snapshot.batch.is_empty() {
            // only stale outbox items: nothing to send
            BatchResponse::default()
        } else {
            self.check_cancelled()?;
            self.set_state(SyncState::Sending);
            report.pushed = snapshot.batch.len();
            debug!(device = %self.config.device_id, records = report.pushed, "sending batch");
            self.transport.push_batch(&snapshot.batch)?
        };

        self.check_cancelled()?;
        self.set_state(SyncState::Applying);
        let applied = self.applier.apply_outcome(&snapshot, &response)?;
        report.synced = applied.marked_synced;
        report.rejected = applied.rejected;
        report.changed_in_flight = applied.changed_in_flight;
        report.outbox_cleared = applied.outbox_cleared;
        report.errors = response.errors.iter().map(ToString::to_string).collect();
        for error in &response.errors {
            warn!(device = %self.config.device_id, %error, "record rejected by remote");
        }

        report.notified = self.dispatch_notifications(&response.transactions_needing_notification);
        self.finish(&report);
        info!(
            device = %self.config.device_id,
            pushed = report.pushed,
            synced = report.synced,
            rejected = report.rejected,
            "sync run complete"
        );
        Ok(report)
    }

    fn dispatch_notifications(&self, ids: &[ClientId]) -> usize {
        let mut sent = 0;
        for id in ids {
            let request = match self.applier.notification_request(id) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    warn!(transaction = %id, error = %e, "could not build notification");
                    continue;
                }
            };
            let outcome = self
                .notifier
                .notify(&request)
                .map_err(SyncError::transport_retryable)
                .and_then(|()| self.applier.record_notified(id));
            match outcome {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(transaction = %id, error = %e, "notification not dispatched");
                    self.stats.write().notification_failures += 1;
                }
            }
        }
        self.stats.write().notifications_sent += sent as u64;
        sent
    }

    fn finish(&self, report: &SyncReport) {
        self.set_state(SyncState::Idle);
        let mut stats = self.stats.write();
        stats.runs_completed += 1;
        stats.records_pushed += report.pushed as u64;
        stats.records_rejected += report.rejected as u64;
        stats.last_sync_time = Some(Instant::now());
        stats.last_error = None;
        stats.retries_exhausted = false;
    }

    fn handle_error(&self, error: &SyncError) {
        warn!(device = %self.config.device_id, %error, "sync run failed");
        self.set_state(SyncState::Failed);
        let mut stats = self.stats.write();
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
    }

    /// Performs a sync, retrying transient errors with backoff.
    ///
    /// Blocks the calling thread between attempts. After the last attempt
    /// the failure is returned and `retries_exhausted` is set.
    pub fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "retrying sync");
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            match self.sync() {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => attempt += 1,
                Err(e) => {
                    if e.is_retryable() {
                        self.mark_exhausted(attempts);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Records that automatic retries gave up.
    pub(crate) fn mark_exhausted(&self, attempts: u32) {
        warn!(device = %self.config.device_id, attempts, "sync retries exhausted, waiting for a manual trigger");
        self.stats.write().retries_exhausted = true;
    }

    /// Counts a retry scheduled outside this engine.
    pub(crate) fn note_retry(&self) {
        self.stats.write().retries += 1;
    }
}
