//! Hand-off of transactions that still need an outside notification.
//!
//! Content and channel belong to the caller. The engine only records
//! whether dispatch succeeded.

use ledgersync_protocol::{ClientId, LineItem, TransactionStatus};
use tracing::info;

/// What a notifier gets to work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// The transaction.
    pub transaction_id: ClientId,
    /// Its line items.
    pub items: Vec<LineItem>,
    /// Grand total.
    pub total: u64,
    /// Amount still due.
    pub balance_due: u64,
    /// Current status.
    pub status: TransactionStatus,
    /// Account display name.
    pub account_name: String,
    /// Account contact address, usually a phone number.
    pub contact: String,
}

/// Delivers notifications.
pub trait Notifier: Send + Sync {
    /// Dispatches one notification. An `Err` leaves the transaction flagged
    /// for the next run.
    fn notify(&self, request: &NotificationRequest) -> Result<(), String>;
}

/// Logs each request and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, request: &NotificationRequest) -> Result<(), String> {
        info!(
            transaction = %request.transaction_id,
            contact = %request.contact,
            total = request.total,
            status = %request.status,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Dispatches nothing and never marks anything notified.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _request: &NotificationRequest) -> Result<(), String> {
        Err("notifications disabled".into())
    }
}
