//! Per-class conflict policy.

use crate::error::{ServerError, ServerResult};
use ledgersync_core::{post_entry, Books, CoreError, CoreResult, EntityStore, WriteTxn};
use ledgersync_protocol::{
    Account, BatchResponse, ClientId, Entity, EntityClass, LedgerEntry, Payment, RecordError,
    SyncBatch, Transaction, ValidationError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters over the reconciler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Batches applied.
    pub batches: u64,
    /// Records written for the first time or overwritten.
    pub accepted: u64,
    /// Records that were already present unchanged.
    pub replays: u64,
    /// Records rejected.
    pub rejected: u64,
}

enum Outcome {
    Accepted,
    Replayed,
    Rejected(RecordError),
}

/// Applies device batches to the server store.
///
/// Records are applied accounts first, then transactions, ledger entries
/// and payments, each in its own atomic write so one bad record never
/// affects another.
pub struct Reconciler {
    books: Books,
    stats: Mutex<ReconcilerStats>,
}

impl Reconciler {
    /// Creates a reconciler over `store`.
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self {
            books: Books::new(store),
            stats: Mutex::new(ReconcilerStats::default()),
        }
    }

    /// Ledger queries and repair over the server store.
    #[must_use]
    pub fn books(&self) -> &Books {
        &self.books
    }

    /// The server store.
    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        self.books.store()
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        *self.stats.lock()
    }

    /// Applies a batch and reports what happened to each record.
    ///
    /// # Errors
    ///
    /// Only store failures fail the call; records applied before the failure
    /// stay applied, which replay makes harmless.
    pub fn apply(&self, batch: SyncBatch) -> ServerResult<BatchResponse> {
        let mut response = BatchResponse::default();
        let mut replays = 0u64;

        for record in batch.accounts {
            let outcome = self.upsert_account(record)?;
            tally(&mut response, &mut replays, EntityClass::Account, outcome);
        }
        for record in batch.transactions {
            let id = record.client_id.clone();
            let (outcome, notify) = self.upsert_transaction(record)?;
            if notify && !matches!(outcome, Outcome::Rejected(_)) {
                response.transactions_needing_notification.push(id);
            }
            tally(&mut response, &mut replays, EntityClass::Transaction, outcome);
        }
        for record in batch.ledger {
            let outcome = self.append_entry(record)?;
            tally(&mut response, &mut replays, EntityClass::LedgerEntry, outcome);
        }
        for record in batch.payments {
            let outcome = self.append_payment(record)?;
            tally(&mut response, &mut replays, EntityClass::Payment, outcome);
        }

        let accepted = response.synced.total();
        let rejected = response.errors.len() as u64;
        {
            let mut stats = self.stats.lock();
            stats.batches += 1;
            stats.accepted += accepted - replays.min(accepted);
            stats.replays += replays;
            stats.rejected += rejected;
        }
        info!(
            accepted,
            replays,
            rejected,
            notify = response.transactions_needing_notification.len(),
            "batch reconciled"
        );
        Ok(response)
    }

    /// Upsert-overwrite. The server balance is kept; only ledger entries
    /// move it.
    fn upsert_account(&self, incoming: Account) -> ServerResult<Outcome> {
        let id = incoming.client_id.clone();
        let result = self.store().write(|txn| {
            let mut record = incoming;
            record.synced = true;
            let existing = txn.get::<Account>(&record.client_id);
            record.balance = existing.map_or(0, |e| e.balance);
            if existing.is_some_and(|e| e.same_content(&record)) {
                return Ok(Outcome::Replayed);
            }
            txn.put(record)?;
            Ok(Outcome::Accepted)
        });
        settle(EntityClass::Account, id, result)
    }

    /// Upsert-overwrite, every field. Also reports whether the transaction
    /// still needs its notification.
    fn upsert_transaction(&self, incoming: Transaction) -> ServerResult<(Outcome, bool)> {
        let id = incoming.client_id.clone();
        let mut notify = false;
        let result = self.store().write(|txn| {
            let mut record = incoming;
            record.synced = true;
            record.validate()?;
            require_account(txn, EntityClass::Transaction, &record.client_id, &record.account_id)?;

            let existing = txn.get::<Transaction>(&record.client_id);
            let previously_notified = existing.is_some_and(|e| e.notified);
            notify = !record.is_draft() && !record.notified && !previously_notified;
            if existing.is_some_and(|e| e.same_content(&record)) {
                return Ok(Outcome::Replayed);
            }
            txn.put(record)?;
            Ok(Outcome::Accepted)
        });
        let outcome = settle(EntityClass::Transaction, id, result)?;
        Ok((outcome, notify))
    }

    /// Append-dedupe. A new entry moves the account balance in the same
    /// write that inserts it.
    fn append_entry(&self, incoming: LedgerEntry) -> ServerResult<Outcome> {
        let id = incoming.client_id.clone();
        let result = self.store().write(|txn| {
            incoming.validate()?;
            if txn.contains::<LedgerEntry>(&incoming.client_id) {
                return Ok(Outcome::Replayed);
            }
            let mut record = incoming;
            record.synced = true;
            post_entry(txn, record)?;
            Ok(Outcome::Accepted)
        });
        settle(EntityClass::LedgerEntry, id, result)
    }

    /// Append-dedupe.
    fn append_payment(&self, incoming: Payment) -> ServerResult<Outcome> {
        let id = incoming.client_id.clone();
        let result = self.store().write(|txn| {
            incoming.validate()?;
            if txn.contains::<Payment>(&incoming.client_id) {
                return Ok(Outcome::Replayed);
            }
            require_account(txn, EntityClass::Payment, &incoming.client_id, &incoming.account_id)?;
            if let Some(txn_id) = &incoming.transaction_id {
                if !txn.contains::<Transaction>(txn_id) {
                    return Err(CoreError::unknown_reference(
                        EntityClass::Payment,
                        &incoming.client_id,
                        EntityClass::Transaction,
                        txn_id,
                    ));
                }
            }
            let mut record = incoming;
            record.synced = true;
            txn.put(record)?;
            Ok(Outcome::Accepted)
        });
        settle(EntityClass::Payment, id, result)
    }
}

fn require_account(
    txn: &WriteTxn<'_>,
    class: EntityClass,
    client_id: &ClientId,
    account_id: &ClientId,
) -> CoreResult<()> {
    if txn.contains::<Account>(account_id) {
        Ok(())
    } else {
        Err(CoreError::unknown_reference(
            class,
            client_id,
            EntityClass::Account,
            account_id,
        ))
    }
}

/// Turns record-level store errors into per-record outcomes; anything else
/// fails the request.
fn settle(class: EntityClass, client_id: ClientId, result: CoreResult<Outcome>) -> ServerResult<Outcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(CoreError::Validation(err)) => Ok(Outcome::Rejected(RecordError::validation(
            class, client_id, &err,
        ))),
        Err(err @ CoreError::UnknownReference { .. }) => Ok(Outcome::Rejected(
            RecordError::reference(class, client_id, err.to_string()),
        )),
        Err(err @ CoreError::AppendOnlyViolation { .. }) => Ok(Outcome::Rejected(
            RecordError::validation(class, client_id, &ValidationError::Inconsistent(err.to_string())),
        )),
        Err(err) => Err(ServerError::Store(err)),
    }
}

fn tally(response: &mut BatchResponse, replays: &mut u64, class: EntityClass, outcome: Outcome) {
    match outcome {
        Outcome::Accepted => response.synced.bump(class),
        Outcome::Replayed => {
            debug!(%class, "replayed record ignored");
            *replays += 1;
            response.synced.bump(class);
        }
        Outcome::Rejected(err) => {
            warn!(class = %err.class, client_id = %err.client_id, error = %err.error, "record rejected");
            response.errors.push(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgersync_protocol::{Direction, EntrySource, LineItem, RecordErrorKind, TransactionKind, TransactionStatus};

    fn reconciler() -> Reconciler {
        Reconciler::new(Arc::new(EntityStore::open_in_memory().unwrap()))
    }

    fn sale(id: &str, account: &str, total: u64) -> Transaction {
        Transaction {
            client_id: id.into(),
            account_id: account.into(),
            kind: TransactionKind::Sale,
            items: vec![LineItem::new("rice", 1, total)],
            total,
            tax_percent: 0,
            amount_paid: 0,
            balance_due: total,
            status: TransactionStatus::Pending,
            notes: String::new(),
            due_date: None,
            notified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            synced: false,
        }
    }

    fn credit(id: &str, account: &str, amount: u64) -> LedgerEntry {
        LedgerEntry::new(id.into(), account.into(), Direction::Credit, amount, EntrySource::Transaction).unwrap()
    }

    #[test]
    fn account_upsert_keeps_server_balance() {
        let r = reconciler();
        let batch = SyncBatch {
            accounts: vec![Account::new("A1".into(), "Ravi")],
            ledger: vec![credit("L1", "A1", 1000)],
            ..SyncBatch::default()
        };
        r.apply(batch).unwrap();

        let mut renamed = Account::new("A1".into(), "Ravi Kumar");
        renamed.balance = -5;
        let response = r
            .apply(SyncBatch {
                accounts: vec![renamed],
                ..SyncBatch::default()
            })
            .unwrap();
        assert_eq!(response.synced.accounts, 1);
        let stored = r.store().get::<Account>(&"A1".into()).unwrap();
        assert_eq!(stored.name, "Ravi Kumar");
        assert_eq!(stored.balance, 1000);
        assert!(stored.synced);
    }

    #[test]
    fn transaction_with_unknown_account_is_reference_error() {
        let r = reconciler();
        let response = r
            .apply(SyncBatch {
                accounts: vec![Account::new("A1".into(), "Ravi")],
                transactions: vec![sale("T1", "A1", 100), sale("T2", "A9", 100)],
                ..SyncBatch::default()
            })
            .unwrap();
        assert_eq!(response.synced.accounts, 1);
        assert_eq!(response.synced.transactions, 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].client_id.as_str(), "T2");
        assert_eq!(response.errors[0].kind, RecordErrorKind::Reference);
        assert_eq!(response.transactions_needing_notification, vec![ClientId::from("T1")]);
    }

    #[test]
    fn invalid_transaction_is_validation_error() {
        let r = reconciler();
        let mut bad = sale("T1", "A1", 100);
        bad.balance_due = 3;
        let response = r
            .apply(SyncBatch {
                accounts: vec![Account::new("A1".into(), "Ravi")],
                transactions: vec![bad],
                ..SyncBatch::default()
            })
            .unwrap();
        assert_eq!(response.errors[0].kind, RecordErrorKind::Validation);
        assert!(response.transactions_needing_notification.is_empty());
    }

    #[test]
    fn ledger_replay_does_not_move_balance() {
        let r = reconciler();
        let batch = SyncBatch {
            accounts: vec![Account::new("A1".into(), "Ravi")],
            ledger: vec![credit("L1", "A1", 700)],
            ..SyncBatch::default()
        };
        r.apply(batch.clone()).unwrap();
        let sequence = r.store().sequence();
        let response = r.apply(batch).unwrap();
        assert_eq!(response.synced.ledger, 1);
        assert!(response.errors.is_empty());
        assert_eq!(r.store().sequence(), sequence);
        assert_eq!(r.store().get::<Account>(&"A1".into()).unwrap().balance, 700);
        assert_eq!(r.stats().replays, 2);
    }

    #[test]
    fn conflicting_ledger_copy_is_ignored() {
        let r = reconciler();
        r.apply(SyncBatch {
            accounts: vec![Account::new("A1".into(), "Ravi")],
            ledger: vec![credit("L1", "A1", 700)],
            ..SyncBatch::default()
        })
        .unwrap();
        let response = r
            .apply(SyncBatch {
                ledger: vec![credit("L1", "A1", 9)],
                ..SyncBatch::default()
            })
            .unwrap();
        assert_eq!(response.synced.ledger, 1);
        assert_eq!(r.store().get::<LedgerEntry>(&"L1".into()).unwrap().amount, 700);
    }

    #[test]
    fn payment_reference_checks() {
        let r = reconciler();
        let payment = |id: &str, txn: Option<&str>| Payment {
            client_id: id.into(),
            account_id: "A1".into(),
            transaction_id: txn.map(ClientId::from),
            amount: 50,
            method: Default::default(),
            date: Utc::now().date_naive(),
            note: String::new(),
            created_at: Utc::now(),
            synced: false,
        };
        let response = r
            .apply(SyncBatch {
                accounts: vec![Account::new("A1".into(), "Ravi")],
                transactions: vec![sale("T1", "A1", 100)],
                payments: vec![payment("P1", Some("T1")), payment("P2", Some("T404")), payment("P3", None)],
                ..SyncBatch::default()
            })
            .unwrap();
        assert_eq!(response.synced.payments, 2);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].client_id.as_str(), "P2");
    }

    #[test]
    fn notified_or_draft_transactions_are_not_listed() {
        let r = reconciler();
        let mut draft = sale("T1", "A1", 100);
        draft.status = TransactionStatus::Draft;
        let mut done = sale("T2", "A1", 100);
        done.notified = true;
        let response = r
            .apply(SyncBatch {
                accounts: vec![Account::new("A1".into(), "Ravi")],
                transactions: vec![draft, done],
                ..SyncBatch::default()
            })
            .unwrap();
        assert_eq!(response.synced.transactions, 2);
        assert!(response.transactions_needing_notification.is_empty());

        // a later copy that lost the flag is not notified twice
        let response = r
            .apply(SyncBatch {
                transactions: vec![sale("T2", "A1", 100)],
                ..SyncBatch::default()
            })
            .unwrap();
        assert!(response.transactions_needing_notification.is_empty());
    }
}
