//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use ledgersync_protocol::{BalanceReport, BatchResponse, ClientId, SyncBatch, SyncedCounts};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport carries batches to the reconciler.
///
/// Implementations decide the wire: HTTP, an in-process loopback, or a mock.
pub trait SyncTransport: Send + Sync {
    /// Sends one batch and returns the reconciler's per-record outcome.
    fn push_batch(&self, batch: &SyncBatch) -> SyncResult<BatchResponse>;

    /// Asks the remote for an account's recomputed balance.
    fn balance(&self, account_id: &ClientId) -> SyncResult<BalanceReport>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Without a scripted response a push is accepted in full.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<VecDeque<SyncResult<BatchResponse>>>,
    pushed: Mutex<Vec<SyncBatch>>,
    balance: Mutex<Option<BalanceReport>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues the response to the next push.
    pub fn push_response(&self, response: BatchResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Makes the next `count` pushes fail with a retryable transport error.
    pub fn fail_next(&self, count: usize) {
        let mut responses = self.responses.lock();
        for _ in 0..count {
            responses.push_back(Err(SyncError::transport_retryable("connection reset")));
        }
    }

    /// Queues an error for the next push.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Sets the balance report returned by [`SyncTransport::balance`].
    pub fn set_balance(&self, report: BalanceReport) {
        *self.balance.lock() = Some(report);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every batch pushed so far, failed attempts included.
    pub fn pushed(&self) -> Vec<SyncBatch> {
        self.pushed.lock().clone()
    }

    fn accept_all(batch: &SyncBatch) -> BatchResponse {
        BatchResponse {
            synced: SyncedCounts {
                accounts: count(batch.accounts.len()),
                transactions: count(batch.transactions.len()),
                ledger: count(batch.ledger.len()),
                payments: count(batch.payments.len()),
            },
            ..BatchResponse::default()
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl SyncTransport for MockTransport {
    fn push_batch(&self, batch: &SyncBatch) -> SyncResult<BatchResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pushed.lock().push(batch.clone());
        match self.responses.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(Self::accept_all(batch)),
        }
    }

    fn balance(&self, account_id: &ClientId) -> SyncResult<BalanceReport> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.balance
            .lock()
            .clone()
            .filter(|report| &report.account_id == account_id)
            .ok_or_else(|| SyncError::Rejected(format!("no balance for {account_id}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
