//! Ledger engine.
//!
//! Pure functions: balance derivation, entry construction from business
//! events, and transaction settlement. Nothing here touches the store;
//! [`Books`](crate::Books) applies the results atomically.
//!
//! Direction is decided by the event, not by the transaction kind: a
//! finalized transaction credits the account, a payment debits it, a manual
//! adjustment goes whichever way the caller says.

use ledgersync_protocol::{
    Account, ClientId, Direction, EntrySource, LedgerEntry, Payment, Transaction,
    TransactionKind, TransactionStatus, ValidationError,
};
use serde::{Deserialize, Serialize};

/// Signed sum of `entries`: credits minus debits.
pub fn balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries
        .into_iter()
        .fold(0i64, |acc, e| acc.saturating_add(e.signed_amount()))
}

/// Balance of one account over a mixed set of entries.
pub fn balance_of<'a>(
    account_id: &ClientId,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> i64 {
    balance(entries.into_iter().filter(|e| &e.account_id == account_id))
}

/// Totals for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Credits minus debits.
    pub balance: i64,
    /// Entries counted.
    pub entry_count: u64,
    /// Sum of credit amounts.
    pub credits: u64,
    /// Sum of debit amounts.
    pub debits: u64,
}

/// Tallies the entries of `account_id`.
pub fn tally<'a>(
    account_id: &ClientId,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Tally {
    let mut tally = Tally::default();
    for entry in entries.into_iter().filter(|e| &e.account_id == account_id) {
        tally.entry_count += 1;
        tally.balance = tally.balance.saturating_add(entry.signed_amount());
        match entry.direction {
            Direction::Credit => tally.credits = tally.credits.saturating_add(entry.amount),
            Direction::Debit => tally.debits = tally.debits.saturating_add(entry.amount),
        }
    }
    tally
}

/// Disagreement between a cached balance and the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    /// The account.
    pub account_id: ClientId,
    /// Balance cached on the account.
    pub cached: i64,
    /// Balance derived from the ledger.
    pub derived: i64,
}

impl Drift {
    /// `cached - derived`.
    #[must_use]
    pub fn difference(&self) -> i64 {
        self.cached.saturating_sub(self.derived)
    }
}

/// Compares an account's cached balance with its ledger.
pub fn audit<'a>(
    account: &Account,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Option<Drift> {
    let derived = balance_of(&account.client_id, entries);
    (account.balance != derived).then(|| Drift {
        account_id: account.client_id.clone(),
        cached: account.balance,
        derived,
    })
}

/// The materializing entry of a finalized transaction.
///
/// A credit of the balance due at that moment; prepaid amounts are left
/// out. Drafts and fully prepaid transactions produce none.
pub fn transaction_entry(txn: &Transaction) -> Result<Option<LedgerEntry>, ValidationError> {
    if txn.is_draft() || txn.balance_due == 0 {
        return Ok(None);
    }
    let label = match txn.kind {
        TransactionKind::Sale => "Sale",
        TransactionKind::Purchase => "Purchase",
    };
    let entry = LedgerEntry::new(
        ClientId::generate(),
        txn.account_id.clone(),
        Direction::Credit,
        txn.balance_due,
        EntrySource::Transaction,
    )?
    .with_transaction(txn.client_id.clone())
    .with_description(format!("{label} {}", txn.client_id));
    Ok(Some(entry))
}

/// The debit entry recording a payment.
pub fn payment_entry(payment: &Payment) -> Result<LedgerEntry, ValidationError> {
    let mut entry = LedgerEntry::new(
        ClientId::generate(),
        payment.account_id.clone(),
        Direction::Debit,
        payment.amount,
        EntrySource::Payment,
    )?
    .with_description(format!("Payment ({}) {}", payment.method, payment.client_id));
    if let Some(txn) = &payment.transaction_id {
        entry = entry.with_transaction(txn.clone());
    }
    Ok(entry)
}

/// A manual correction in the caller's direction.
pub fn adjustment_entry(
    account_id: ClientId,
    direction: Direction,
    amount: u64,
    description: Option<&str>,
) -> Result<LedgerEntry, ValidationError> {
    let entry = LedgerEntry::new(
        ClientId::generate(),
        account_id,
        direction,
        amount,
        EntrySource::Manual,
    )?;
    Ok(match description {
        Some(text) => entry.with_description(text),
        None => entry,
    })
}

/// Balance due and status for a final transaction.
///
/// `balanceDue = max(0, total - paid)`; paid iff nothing is due. An overdue
/// transaction that still has something due stays overdue.
#[must_use]
pub fn settle(total: u64, amount_paid: u64, previous: TransactionStatus) -> (u64, TransactionStatus) {
    let due = total.saturating_sub(amount_paid);
    let status = if due == 0 {
        TransactionStatus::Paid
    } else if previous == TransactionStatus::Overdue {
        TransactionStatus::Overdue
    } else if amount_paid > 0 {
        TransactionStatus::Partial
    } else {
        TransactionStatus::Pending
    };
    (due, status)
}

/// Applies a payment of `amount` to a final transaction.
pub fn apply_payment(txn: &mut Transaction, amount: u64) {
    txn.amount_paid = txn.amount_paid.saturating_add(amount);
    let (due, status) = settle(txn.total, txn.amount_paid, txn.status);
    txn.balance_due = due;
    txn.status = status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgersync_protocol::{LineItem, PaymentMethod};
    use proptest::prelude::*;

    fn entry(account: &str, direction: Direction, amount: u64) -> LedgerEntry {
        LedgerEntry::new(
            ClientId::generate(),
            account.into(),
            direction,
            amount,
            EntrySource::Manual,
        )
        .unwrap()
    }

    fn sale(total: u64, paid: u64, status: TransactionStatus) -> Transaction {
        let (due, derived) = settle(total, paid, TransactionStatus::Pending);
        Transaction {
            client_id: "T1".into(),
            account_id: "A1".into(),
            kind: TransactionKind::Sale,
            items: vec![LineItem::new("x", 1, total)],
            total,
            tax_percent: 0,
            amount_paid: paid,
            balance_due: due,
            status: if status == TransactionStatus::Draft {
                status
            } else {
                derived
            },
            notes: String::new(),
            due_date: None,
            notified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            synced: false,
        }
    }

    #[test]
    fn balance_is_credits_minus_debits() {
        let entries = vec![
            entry("A1", Direction::Credit, 1000),
            entry("A1", Direction::Debit, 400),
            entry("A2", Direction::Credit, 50),
        ];
        assert_eq!(balance_of(&"A1".into(), &entries), 600);
        assert_eq!(balance(&entries), 650);

        let t = tally(&"A1".into(), &entries);
        assert_eq!(t.entry_count, 2);
        assert_eq!(t.credits, 1000);
        assert_eq!(t.debits, 400);
        assert_eq!(t.balance, 600);
    }

    #[test]
    fn draft_and_prepaid_produce_no_entry() {
        assert!(transaction_entry(&sale(1000, 0, TransactionStatus::Draft))
            .unwrap()
            .is_none());
        assert!(transaction_entry(&sale(1000, 1000, TransactionStatus::Paid))
            .unwrap()
            .is_none());
    }

    #[test]
    fn transaction_entry_credits_balance_due() {
        let txn = sale(1000, 300, TransactionStatus::Partial);
        let entry = transaction_entry(&txn).unwrap().unwrap();
        assert_eq!(entry.direction, Direction::Credit);
        assert_eq!(entry.amount, 700);
        assert_eq!(entry.source, EntrySource::Transaction);
        assert_eq!(entry.transaction_id, Some("T1".into()));
    }

    #[test]
    fn purchase_still_credits() {
        let mut txn = sale(500, 0, TransactionStatus::Pending);
        txn.kind = TransactionKind::Purchase;
        let entry = transaction_entry(&txn).unwrap().unwrap();
        assert_eq!(entry.direction, Direction::Credit);
        assert!(entry.description.starts_with("Purchase"));
    }

    #[test]
    fn payment_entry_is_debit() {
        let payment = Payment {
            client_id: "P1".into(),
            account_id: "A1".into(),
            transaction_id: Some("T1".into()),
            amount: 400,
            method: PaymentMethod::Upi,
            date: Utc::now().date_naive(),
            note: String::new(),
            created_at: Utc::now(),
            synced: false,
        };
        let entry = payment_entry(&payment).unwrap();
        assert_eq!(entry.direction, Direction::Debit);
        assert_eq!(entry.amount, 400);
        assert_eq!(entry.source, EntrySource::Payment);
        assert_eq!(entry.transaction_id, Some("T1".into()));
    }

    #[test]
    fn adjustment_rejects_zero() {
        assert!(adjustment_entry("A1".into(), Direction::Debit, 0, None).is_err());
        let e = adjustment_entry("A1".into(), Direction::Debit, 5, Some("rounding")).unwrap();
        assert_eq!(e.description, "rounding");
        assert_eq!(e.source, EntrySource::Manual);
    }

    #[test]
    fn payment_settles_transaction() {
        let mut txn = sale(1000, 0, TransactionStatus::Pending);
        apply_payment(&mut txn, 400);
        assert_eq!(txn.amount_paid, 400);
        assert_eq!(txn.balance_due, 600);
        assert_eq!(txn.status, TransactionStatus::Partial);
        apply_payment(&mut txn, 700);
        assert_eq!(txn.balance_due, 0);
        assert_eq!(txn.status, TransactionStatus::Paid);
    }

    #[test]
    fn overdue_stays_overdue_until_paid() {
        let mut txn = sale(1000, 0, TransactionStatus::Pending);
        txn.status = TransactionStatus::Overdue;
        apply_payment(&mut txn, 100);
        assert_eq!(txn.status, TransactionStatus::Overdue);
        apply_payment(&mut txn, 900);
        assert_eq!(txn.status, TransactionStatus::Paid);
    }

    #[test]
    fn audit_reports_drift() {
        let mut account = Account::new("A1".into(), "Ravi");
        let entries = vec![entry("A1", Direction::Credit, 300)];
        account.balance = 250;
        let drift = audit(&account, &entries).unwrap();
        assert_eq!(drift.derived, 300);
        assert_eq!(drift.difference(), -50);
        account.balance = 300;
        assert!(audit(&account, &entries).is_none());
    }

    proptest! {
        #[test]
        fn settlement_invariants(total in 1u64..1_000_000, payments in proptest::collection::vec(1u64..500_000, 0..6)) {
            let mut txn = sale(total, 0, TransactionStatus::Pending);
            let mut paid = 0u64;
            for p in payments {
                apply_payment(&mut txn, p);
                paid += p;
                prop_assert_eq!(txn.amount_paid, paid);
                prop_assert_eq!(txn.balance_due, total.saturating_sub(paid));
                prop_assert_eq!(txn.status == TransactionStatus::Paid, txn.balance_due == 0);
                prop_assert_eq!(txn.status == TransactionStatus::Paid, paid >= total);
            }
        }

        #[test]
        fn balance_is_order_independent(amounts in proptest::collection::vec((1u64..10_000, any::<bool>()), 0..40)) {
            let entries: Vec<LedgerEntry> = amounts
                .iter()
                .map(|(a, credit)| entry("A1", if *credit { Direction::Credit } else { Direction::Debit }, *a))
                .collect();
            let forward = balance(&entries);
            let backward = balance(entries.iter().rev());
            let expected: i64 = amounts.iter().map(|(a, c)| if *c { *a as i64 } else { -(*a as i64) }).sum();
            prop_assert_eq!(forward, backward);
            prop_assert_eq!(forward, expected);
        }
    }
}
