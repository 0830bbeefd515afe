//! The seam between the engine and the local store.

use crate::error::SyncResult;
use crate::notify::NotificationRequest;
use ledgersync_core::outbox::{self, OutboxId, OutboxItem};
use ledgersync_core::{Books, CoreResult, EntityStore, ReadView, Stored, WriteTxn};
use ledgersync_protocol::{
    Account, BatchResponse, ClientId, Entity, EntityClass, LedgerEntry, Payment, SyncBatch,
    Transaction,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// What a run collected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Every unsynced or queued record, grouped by class.
    pub batch: SyncBatch,
    /// Highest outbox id at snapshot time.
    pub watermark: Option<OutboxId>,
}

impl Snapshot {
    /// Returns true if there is nothing to send and nothing to clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty() && self.watermark.is_none()
    }
}

/// Local effect of one applied response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedOutcome {
    /// Records now flagged synced.
    pub marked_synced: usize,
    /// Records the reconciler rejected; they stay unsynced.
    pub rejected: usize,
    /// Records edited while the batch was in flight; they stay unsynced.
    pub changed_in_flight: usize,
    /// Outbox items removed.
    pub outbox_cleared: usize,
}

/// Unsynced records per class and the outbox length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSummary {
    /// Unsynced accounts.
    pub accounts: usize,
    /// Unsynced transactions.
    pub transactions: usize,
    /// Unsynced ledger entries.
    pub ledger: usize,
    /// Unsynced payments.
    pub payments: usize,
    /// Outbox items.
    pub outbox: usize,
}

impl PendingSummary {
    /// Total unsynced records.
    #[must_use]
    pub fn records(&self) -> usize {
        self.accounts + self.transactions + self.ledger + self.payments
    }

    /// Returns true if nothing awaits the remote.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records() == 0 && self.outbox == 0
    }
}

/// Local side of a sync run.
pub trait SyncApplier: Send + Sync {
    /// Takes one consistent snapshot of pending work.
    fn collect(&self) -> SyncResult<Snapshot>;

    /// Marks accepted records synced and clears the outbox the batch covered.
    fn apply_outcome(
        &self,
        snapshot: &Snapshot,
        response: &BatchResponse,
    ) -> SyncResult<AppliedOutcome>;

    /// Builds the hand-off for a transaction, or `None` if it needs none.
    fn notification_request(
        &self,
        transaction_id: &ClientId,
    ) -> SyncResult<Option<NotificationRequest>>;

    /// Records a successful dispatch. Returns false if already recorded.
    fn record_notified(&self, transaction_id: &ClientId) -> SyncResult<bool>;

    /// Counts what is still waiting for the remote.
    fn pending_summary(&self) -> SyncResult<PendingSummary>;
}

/// A sync applier over an [`EntityStore`].
#[derive(Debug, Clone)]
pub struct StoreApplier {
    books: Books,
}

impl StoreApplier {
    /// Creates an applier over `store`.
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self {
            books: Books::new(store),
        }
    }

    /// Bookkeeping operations over the same store.
    pub fn books(&self) -> &Books {
        &self.books
    }

    /// The local store.
    pub fn store(&self) -> &Arc<EntityStore> {
        self.books.store()
    }
}

type Queued = HashSet<(EntityClass, ClientId)>;

fn pending<T: Stored>(view: &ReadView<'_>, queued: &Queued) -> Vec<T> {
    view.all::<T>()
        .filter(|r| !r.is_synced() || queued.contains(&(T::CLASS, r.client_id().clone())))
        .cloned()
        .collect()
}

fn mark_synced<T: Stored>(
    txn: &mut WriteTxn<'_>,
    sent: &[T],
    failed: &Queued,
    outcome: &mut AppliedOutcome,
) -> CoreResult<()> {
    for record in sent {
        if failed.contains(&(T::CLASS, record.client_id().clone())) {
            outcome.rejected += 1;
            continue;
        }
        let Some(current) = txn.get::<T>(record.client_id()) else {
            continue;
        };
        if current.is_synced() {
            continue;
        }
        if !current.same_content(record) {
            outcome.changed_in_flight += 1;
            continue;
        }
        let mut updated = current.clone();
        updated.set_synced(true);
        txn.put(updated)?;
        outcome.marked_synced += 1;
    }
    Ok(())
}

fn count_unsynced<T: Stored>(view: &ReadView<'_>) -> usize {
    view.all::<T>().filter(|r| !r.is_synced()).count()
}

impl SyncApplier for StoreApplier {
    fn collect(&self) -> SyncResult<Snapshot> {
        Ok(self.store().read(|view| {
            let items: Vec<&OutboxItem> = view.outbox().collect();
            let queued: Queued = items
                .iter()
                .map(|item| (item.class, item.client_id.clone()))
                .collect();
            Snapshot {
                batch: SyncBatch {
                    accounts: pending::<Account>(view, &queued),
                    transactions: pending::<Transaction>(view, &queued),
                    ledger: pending::<LedgerEntry>(view, &queued),
                    payments: pending::<Payment>(view, &queued),
                },
                watermark: outbox::watermark(items.iter().copied()),
            }
        }))
    }

    fn apply_outcome(
        &self,
        snapshot: &Snapshot,
        response: &BatchResponse,
    ) -> SyncResult<AppliedOutcome> {
        let failed = response.failed();
        let outcome = self.store().write(|txn| {
            let mut outcome = AppliedOutcome::default();
            mark_synced(txn, &snapshot.batch.accounts, &failed, &mut outcome)?;
            mark_synced(txn, &snapshot.batch.transactions, &failed, &mut outcome)?;
            mark_synced(txn, &snapshot.batch.ledger, &failed, &mut outcome)?;
            mark_synced(txn, &snapshot.batch.payments, &failed, &mut outcome)?;
            if let Some(watermark) = snapshot.watermark {
                let items = txn.outbox();
                let ids = outbox::consumable(&items, watermark, &failed);
                outcome.outbox_cleared = txn.remove_outbox(&ids)?;
            }
            Ok(outcome)
        })?;
        debug!(
            synced = outcome.marked_synced,
            rejected = outcome.rejected,
            changed = outcome.changed_in_flight,
            outbox = outcome.outbox_cleared,
            "response applied"
        );
        Ok(outcome)
    }

    fn notification_request(
        &self,
        transaction_id: &ClientId,
    ) -> SyncResult<Option<NotificationRequest>> {
        Ok(self.store().read(|view| {
            let record = view.get::<Transaction>(transaction_id)?;
            if record.notified || record.is_draft() {
                return None;
            }
            let account = view.get::<Account>(&record.account_id);
            Some(NotificationRequest {
                transaction_id: record.client_id.clone(),
                items: record.items.clone(),
                total: record.total,
                balance_due: record.balance_due,
                status: record.status,
                account_name: account.map(|a| a.name.clone()).unwrap_or_default(),
                contact: account.map(|a| a.phone.clone()).unwrap_or_default(),
            })
        }))
    }

    fn record_notified(&self, transaction_id: &ClientId) -> SyncResult<bool> {
        Ok(self.books.mark_notified(transaction_id)?)
    }

    fn pending_summary(&self) -> SyncResult<PendingSummary> {
        Ok(self.store().read(|view| PendingSummary {
            accounts: count_unsynced::<Account>(view),
            transactions: count_unsynced::<Transaction>(view),
            ledger: count_unsynced::<LedgerEntry>(view),
            payments: count_unsynced::<Payment>(view),
            outbox: view.outbox().count(),
        }))
    }
}
