//! Business operations over the entity store.
//!
//! Each operation is one atomic write: the entity change, the ledger
//! entries it implies, the cached balance update and the outbox items
//! either all land or none do.

use crate::error::{CoreError, CoreResult};
use crate::ledger::{self, Drift};
use crate::outbox::OutboxAction;
use crate::store::{EntityStore, WriteTxn};
use chrono::{NaiveDate, Utc};
use ledgersync_protocol::{
    Account, AccountStatus, BalanceReport, ClientId, Direction, Entity, EntityClass, LedgerEntry,
    LineItem, Payment, PaymentMethod, Transaction, TransactionKind, TransactionStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input for [`Books::create_account`].
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Identity to use; generated when absent.
    pub client_id: Option<ClientId>,
    /// Display name; required.
    pub name: String,
    /// Contact phone; defaults to empty.
    pub phone: String,
    /// Address; defaults to empty.
    pub address: String,
    /// Status; defaults to active.
    pub status: AccountStatus,
}

impl NewAccount {
    /// An active account with no contact details.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            client_id: None,
            name: name.into(),
            phone: String::new(),
            address: String::new(),
            status: AccountStatus::Active,
        }
    }

    /// Uses a fixed identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Sets the phone.
    #[must_use]
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    /// Sets the address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

/// Field changes for [`Books::update_account`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    /// New name.
    pub name: Option<String>,
    /// New phone.
    pub phone: Option<String>,
    /// New address.
    pub address: Option<String>,
    /// New status.
    pub status: Option<AccountStatus>,
}

impl AccountPatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.address.is_none() && self.status.is_none()
    }
}

/// Input for [`Books::create_transaction`].
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Identity to use; generated when absent.
    pub client_id: Option<ClientId>,
    /// Owning account.
    pub account_id: ClientId,
    /// Sale or purchase; defaults to sale.
    pub kind: TransactionKind,
    /// Line items; at least one.
    pub items: Vec<LineItem>,
    /// Tax rate in whole percent; defaults to 0.
    pub tax_percent: u32,
    /// Grand total; defaults to subtotal plus tax.
    pub total: Option<u64>,
    /// Amount paid up front; defaults to 0. Not allowed on drafts.
    pub amount_paid: u64,
    /// Create as a draft.
    pub draft: bool,
    /// Free text; defaults to empty.
    pub notes: String,
    /// Optional due date.
    pub due_date: Option<NaiveDate>,
}

impl NewTransaction {
    /// A pending sale with the given items.
    pub fn new(account_id: ClientId, items: Vec<LineItem>) -> Self {
        Self {
            client_id: None,
            account_id,
            kind: TransactionKind::Sale,
            items,
            tax_percent: 0,
            total: None,
            amount_paid: 0,
            draft: false,
            notes: String::new(),
            due_date: None,
        }
    }

    /// Uses a fixed identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Sets the kind.
    #[must_use]
    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the tax rate.
    #[must_use]
    pub fn tax_percent(mut self, percent: u32) -> Self {
        self.tax_percent = percent;
        self
    }

    /// Overrides the computed total.
    #[must_use]
    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Sets the up-front payment.
    #[must_use]
    pub fn amount_paid(mut self, amount: u64) -> Self {
        self.amount_paid = amount;
        self
    }

    /// Marks the transaction as a draft.
    #[must_use]
    pub fn draft(mut self) -> Self {
        self.draft = true;
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Sets the due date.
    #[must_use]
    pub fn due_date(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }
}

/// Input for [`Books::record_payment`].
#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Identity to use; generated when absent.
    pub client_id: Option<ClientId>,
    /// Paying account.
    pub account_id: ClientId,
    /// Transaction being settled, if any.
    pub transaction_id: Option<ClientId>,
    /// Amount; must be positive.
    pub amount: u64,
    /// Method; defaults to cash.
    pub method: PaymentMethod,
    /// Value date; defaults to today (UTC).
    pub date: Option<NaiveDate>,
    /// Free text; defaults to empty.
    pub note: String,
}

impl NewPayment {
    /// A cash payment dated today.
    pub fn new(account_id: ClientId, amount: u64) -> Self {
        Self {
            client_id: None,
            account_id,
            transaction_id: None,
            amount,
            method: PaymentMethod::Cash,
            date: None,
            note: String::new(),
        }
    }

    /// Uses a fixed identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Settles a specific transaction.
    #[must_use]
    pub fn against(mut self, transaction_id: ClientId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the value date.
    #[must_use]
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the note.
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

/// Input for [`Books::adjust`].
#[derive(Debug, Clone)]
pub struct Adjustment {
    /// Account to correct.
    pub account_id: ClientId,
    /// Credit or debit.
    pub direction: Direction,
    /// Amount; must be positive.
    pub amount: u64,
    /// Description; defaults to "Credit <amount>" / "Debit <amount>".
    pub description: Option<String>,
}

impl Adjustment {
    /// An adjustment with the default description.
    pub fn new(account_id: ClientId, direction: Direction, amount: u64) -> Self {
        Self {
            account_id,
            direction,
            amount,
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Appends `entry` and moves its account's cached balance.
///
/// # Errors
///
/// [`CoreError::UnknownReference`] if the account does not exist.
pub fn post_entry(txn: &mut WriteTxn<'_>, entry: LedgerEntry) -> CoreResult<()> {
    let mut account = txn
        .get::<Account>(&entry.account_id)
        .cloned()
        .ok_or_else(|| {
            CoreError::unknown_reference(
                EntityClass::LedgerEntry,
                &entry.client_id,
                EntityClass::Account,
                &entry.account_id,
            )
        })?;
    account.balance = account.balance.saturating_add(entry.signed_amount());
    txn.put(entry)?;
    txn.put(account)
}

fn load<T: crate::Stored>(txn: &WriteTxn<'_>, client_id: &ClientId) -> CoreResult<T> {
    txn.get::<T>(client_id)
        .cloned()
        .ok_or_else(|| CoreError::not_found(T::CLASS, client_id))
}

fn require_account(txn: &WriteTxn<'_>, class: EntityClass, id: &ClientId, account_id: &ClientId) -> CoreResult<()> {
    if txn.contains::<Account>(account_id) {
        Ok(())
    } else {
        Err(CoreError::unknown_reference(class, id, EntityClass::Account, account_id))
    }
}

/// The device's bookkeeping operations.
#[derive(Debug, Clone)]
pub struct Books {
    store: Arc<EntityStore>,
}

impl Books {
    /// Wraps a store.
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Creates an account with zero balance.
    pub fn create_account(&self, input: NewAccount) -> CoreResult<Account> {
        let client_id = input.client_id.unwrap_or_else(ClientId::generate);
        self.store.write(|txn| {
            if txn.contains::<Account>(&client_id) {
                return Err(CoreError::invalid_operation(format!(
                    "account {client_id} already exists"
                )));
            }
            let mut account = Account::new(client_id.clone(), input.name);
            account.phone = input.phone;
            account.address = input.address;
            account.status = input.status;
            txn.put(account.clone())?;
            txn.enqueue(EntityClass::Account, client_id.clone(), OutboxAction::Create)?;
            debug!(account = %client_id, "account created");
            Ok(account)
        })
    }

    /// Changes an account's descriptive fields.
    pub fn update_account(&self, client_id: &ClientId, patch: AccountPatch) -> CoreResult<Account> {
        self.store.write(|txn| {
            let mut account: Account = load(txn, client_id)?;
            if patch.is_empty() {
                return Ok(account);
            }
            if let Some(name) = patch.name {
                account.name = name;
            }
            if let Some(phone) = patch.phone {
                account.phone = phone;
            }
            if let Some(address) = patch.address {
                account.address = address;
            }
            if let Some(status) = patch.status {
                account.status = status;
            }
            account.updated_at = Utc::now();
            account.synced = false;
            txn.put(account.clone())?;
            txn.enqueue(EntityClass::Account, client_id.clone(), OutboxAction::Update)?;
            Ok(account)
        })
    }

    /// Looks up an account.
    #[must_use]
    pub fn account(&self, client_id: &ClientId) -> Option<Account> {
        self.store.get(client_id)
    }

    /// All accounts by name.
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts = self.store.all::<Account>();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.client_id.cmp(&b.client_id)));
        accounts
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Creates a transaction.
    ///
    /// A non-draft with something due materializes exactly one credit entry
    /// for its balance due; a draft materializes none.
    pub fn create_transaction(&self, input: NewTransaction) -> CoreResult<Transaction> {
        if input.draft && input.amount_paid > 0 {
            return Err(CoreError::invalid_operation(
                "a draft cannot carry an up-front payment",
            ));
        }
        let client_id = input.client_id.unwrap_or_else(ClientId::generate);
        self.store.write(|txn| {
            if txn.contains::<Transaction>(&client_id) {
                return Err(CoreError::invalid_operation(format!(
                    "transaction {client_id} already exists"
                )));
            }
            require_account(txn, EntityClass::Transaction, &client_id, &input.account_id)?;

            let now = Utc::now();
            let mut record = Transaction {
                client_id: client_id.clone(),
                account_id: input.account_id,
                kind: input.kind,
                items: input.items,
                total: 0,
                tax_percent: input.tax_percent,
                amount_paid: input.amount_paid,
                balance_due: 0,
                status: TransactionStatus::Pending,
                notes: input.notes,
                due_date: input.due_date,
                notified: false,
                created_at: now,
                updated_at: now,
                synced: false,
            };
            record.total = input
                .total
                .unwrap_or_else(|| record.subtotal().saturating_add(record.tax_amount()));
            let (due, status) = ledger::settle(record.total, record.amount_paid, TransactionStatus::Pending);
            record.balance_due = due;
            record.status = if input.draft {
                TransactionStatus::Draft
            } else {
                status
            };

            txn.put(record.clone())?;
            txn.enqueue(EntityClass::Transaction, client_id.clone(), OutboxAction::Create)?;
            Self::materialize(txn, &record)?;
            debug!(transaction = %client_id, total = record.total, status = %record.status, "transaction created");
            Ok(record)
        })
    }

    /// Turns a draft into a final transaction and materializes its entry.
    pub fn finalize_transaction(&self, client_id: &ClientId) -> CoreResult<Transaction> {
        self.store.write(|txn| {
            let mut record: Transaction = load(txn, client_id)?;
            if !record.is_draft() {
                return Err(CoreError::invalid_operation(format!(
                    "transaction {client_id} is already final ({})",
                    record.status
                )));
            }
            let (due, status) = ledger::settle(record.total, record.amount_paid, TransactionStatus::Pending);
            record.balance_due = due;
            record.status = status;
            record.updated_at = Utc::now();
            record.synced = false;
            txn.put(record.clone())?;
            txn.enqueue(EntityClass::Transaction, client_id.clone(), OutboxAction::Update)?;
            Self::materialize(txn, &record)?;
            debug!(transaction = %client_id, "transaction finalized");
            Ok(record)
        })
    }

    fn materialize(txn: &mut WriteTxn<'_>, record: &Transaction) -> CoreResult<()> {
        if let Some(entry) = ledger::transaction_entry(record)? {
            let entry_id = entry.client_id.clone();
            post_entry(txn, entry)?;
            txn.enqueue(EntityClass::LedgerEntry, entry_id, OutboxAction::Create)?;
        }
        Ok(())
    }

    /// Records that the transaction's notification went out.
    ///
    /// Returns false if it was already recorded.
    pub fn mark_notified(&self, client_id: &ClientId) -> CoreResult<bool> {
        self.store.write(|txn| {
            let mut record: Transaction = load(txn, client_id)?;
            if record.notified {
                return Ok(false);
            }
            record.notified = true;
            record.updated_at = Utc::now();
            record.synced = false;
            txn.put(record)?;
            txn.enqueue(EntityClass::Transaction, client_id.clone(), OutboxAction::Update)?;
            Ok(true)
        })
    }

    /// Flags open transactions whose due date is before `today` as overdue.
    pub fn mark_overdue(&self, today: NaiveDate) -> CoreResult<Vec<ClientId>> {
        self.store.write(|txn| {
            let late = txn.query(|t: &Transaction| {
                matches!(t.status, TransactionStatus::Pending | TransactionStatus::Partial)
                    && t.due_date.is_some_and(|due| due < today)
            });
            let mut flagged = Vec::with_capacity(late.len());
            for mut record in late {
                record.status = TransactionStatus::Overdue;
                record.updated_at = Utc::now();
                record.synced = false;
                flagged.push(record.client_id.clone());
                txn.enqueue(EntityClass::Transaction, record.client_id.clone(), OutboxAction::Update)?;
                txn.put(record)?;
            }
            if !flagged.is_empty() {
                info!(count = flagged.len(), "transactions marked overdue");
            }
            Ok(flagged)
        })
    }

    /// Looks up a transaction.
    #[must_use]
    pub fn transaction(&self, client_id: &ClientId) -> Option<Transaction> {
        self.store.get(client_id)
    }

    /// An account's transactions, newest first.
    #[must_use]
    pub fn transactions_for(&self, account_id: &ClientId) -> Vec<Transaction> {
        let mut records = self.store.query(|t: &Transaction| &t.account_id == account_id);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    // -----------------------------------------------------------------------
    // Payments and adjustments
    // -----------------------------------------------------------------------

    /// Records a payment: a debit entry, the transaction's settlement and the
    /// cached balance reduction.
    pub fn record_payment(&self, input: NewPayment) -> CoreResult<Payment> {
        let client_id = input.client_id.unwrap_or_else(ClientId::generate);
        self.store.write(|txn| {
            if txn.contains::<Payment>(&client_id) {
                return Err(CoreError::invalid_operation(format!(
                    "payment {client_id} already exists"
                )));
            }
            require_account(txn, EntityClass::Payment, &client_id, &input.account_id)?;

            let payment = Payment {
                client_id: client_id.clone(),
                account_id: input.account_id,
                transaction_id: input.transaction_id,
                amount: input.amount,
                method: input.method,
                date: input.date.unwrap_or_else(|| Utc::now().date_naive()),
                note: input.note,
                created_at: Utc::now(),
                synced: false,
            };
            payment.validate()?;

            if let Some(txn_id) = &payment.transaction_id {
                let mut record = txn.get::<Transaction>(txn_id).cloned().ok_or_else(|| {
                    CoreError::unknown_reference(
                        EntityClass::Payment,
                        &client_id,
                        EntityClass::Transaction,
                        txn_id,
                    )
                })?;
                if record.account_id != payment.account_id {
                    return Err(CoreError::invalid_operation(format!(
                        "transaction {txn_id} belongs to account {}",
                        record.account_id
                    )));
                }
                if record.is_draft() {
                    return Err(CoreError::invalid_operation(format!(
                        "transaction {txn_id} is a draft and cannot take payments"
                    )));
                }
                ledger::apply_payment(&mut record, payment.amount);
                record.updated_at = Utc::now();
                record.synced = false;
                txn.put(record)?;
                txn.enqueue(EntityClass::Transaction, txn_id.clone(), OutboxAction::Update)?;
            }

            let entry = ledger::payment_entry(&payment)?;
            let entry_id = entry.client_id.clone();
            post_entry(txn, entry)?;
            txn.put(payment.clone())?;
            txn.enqueue(EntityClass::Payment, client_id.clone(), OutboxAction::Create)?;
            txn.enqueue(EntityClass::LedgerEntry, entry_id, OutboxAction::Create)?;
            debug!(payment = %client_id, amount = payment.amount, "payment recorded");
            Ok(payment)
        })
    }

    /// An account's payments, newest first.
    #[must_use]
    pub fn payments_for(&self, account_id: &ClientId) -> Vec<Payment> {
        let mut records = self.store.query(|p: &Payment| &p.account_id == account_id);
        records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at)));
        records
    }

    /// Posts a manual correction.
    pub fn adjust(&self, adjustment: Adjustment) -> CoreResult<LedgerEntry> {
        let entry = ledger::adjustment_entry(
            adjustment.account_id,
            adjustment.direction,
            adjustment.amount,
            adjustment.description.as_deref(),
        )?;
        self.store.write(|txn| {
            let entry_id = entry.client_id.clone();
            post_entry(txn, entry.clone())?;
            txn.enqueue(EntityClass::LedgerEntry, entry_id, OutboxAction::Create)?;
            info!(account = %entry.account_id, direction = %entry.direction, amount = entry.amount, "manual adjustment");
            Ok(entry)
        })
    }

    // -----------------------------------------------------------------------
    // Ledger queries and repair
    // -----------------------------------------------------------------------

    /// An account's ledger, newest first.
    #[must_use]
    pub fn account_ledger(&self, account_id: &ClientId) -> Vec<LedgerEntry> {
        let mut entries = self.store.query(|e: &LedgerEntry| &e.account_id == account_id);
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    /// Accounts owing the most, highest first.
    #[must_use]
    pub fn top_debtors(&self, limit: usize) -> Vec<Account> {
        let mut debtors = self.store.query(|a: &Account| a.balance > 0);
        debtors.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.name.cmp(&b.name)));
        debtors.truncate(limit);
        debtors
    }

    /// Balance derived by full recomputation, not read from the cache.
    pub fn balance_report(&self, account_id: &ClientId) -> CoreResult<BalanceReport> {
        self.store.read(|view| {
            if view.get::<Account>(account_id).is_none() {
                return Err(CoreError::not_found(EntityClass::Account, account_id));
            }
            let tally = ledger::tally(account_id, view.all::<LedgerEntry>());
            Ok(BalanceReport {
                account_id: account_id.clone(),
                balance: tally.balance,
                entry_count: tally.entry_count,
            })
        })
    }

    /// Compares one account's cached balance with its ledger.
    pub fn audit(&self, account_id: &ClientId) -> CoreResult<Option<Drift>> {
        let drift = self.store.read(|view| {
            let account = view
                .get::<Account>(account_id)
                .ok_or_else(|| CoreError::not_found(EntityClass::Account, account_id))?;
            Ok::<_, CoreError>(ledger::audit(account, view.all::<LedgerEntry>()))
        })?;
        if let Some(d) = &drift {
            warn!(account = %d.account_id, cached = d.cached, derived = d.derived, "balance drift detected");
        }
        Ok(drift)
    }

    /// Audits every account.
    #[must_use]
    pub fn audit_all(&self) -> Vec<Drift> {
        let drifts: Vec<Drift> = self.store.read(|view| {
            let entries: Vec<&LedgerEntry> = view.all::<LedgerEntry>().collect();
            view.all::<Account>()
                .filter_map(|account| ledger::audit(account, entries.iter().copied()))
                .collect()
        });
        for d in &drifts {
            warn!(account = %d.account_id, cached = d.cached, derived = d.derived, "balance drift detected");
        }
        drifts
    }

    /// Overwrites an account's cached balance with its ledger balance.
    pub fn recalculate(&self, account_id: &ClientId) -> CoreResult<i64> {
        self.store.write(|txn| {
            let mut account: Account = load(txn, account_id)?;
            let derived = ledger::balance_of(account_id, &txn.all::<LedgerEntry>());
            if account.balance != derived {
                info!(account = %account_id, cached = account.balance, derived, "balance repaired");
                account.balance = derived;
                txn.put(account)?;
            }
            Ok(derived)
        })
    }

    /// Repairs every drifted account; returns what was repaired.
    pub fn recalculate_all(&self) -> CoreResult<Vec<Drift>> {
        self.store.write(|txn| {
            let entries = txn.all::<LedgerEntry>();
            let mut repaired = Vec::new();
            for mut account in txn.all::<Account>() {
                if let Some(drift) = ledger::audit(&account, &entries) {
                    account.balance = drift.derived;
                    txn.put(account)?;
                    repaired.push(drift);
                }
            }
            if !repaired.is_empty() {
                info!(count = repaired.len(), "balances repaired");
            }
            Ok(repaired)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxItem;

    fn books() -> Books {
        Books::new(Arc::new(EntityStore::open_in_memory().unwrap()))
    }

    fn account(books: &Books, id: &str) -> ClientId {
        books
            .create_account(NewAccount::new("Ravi").with_client_id(id.into()))
            .unwrap()
            .client_id
    }

    fn items(price: u64) -> Vec<LineItem> {
        vec![LineItem::new("rice", 1, price)]
    }

    fn outbox_classes(items: &[OutboxItem]) -> Vec<EntityClass> {
        items.iter().map(|i| i.class).collect()
    }

    #[test]
    fn sale_then_partial_payment() {
        let books = books();
        let a1 = account(&books, "A1");
        let t1 = books
            .create_transaction(NewTransaction::new(a1.clone(), items(1000)).with_client_id("T1".into()))
            .unwrap();
        assert_eq!(t1.total, 1000);
        assert_eq!(t1.status, TransactionStatus::Pending);
        assert_eq!(books.account(&a1).unwrap().balance, 1000);

        let ledger = books.account_ledger(&a1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].direction, Direction::Credit);
        assert_eq!(ledger[0].amount, 1000);

        books
            .record_payment(NewPayment::new(a1.clone(), 400).against("T1".into()))
            .unwrap();
        let t1 = books.transaction(&"T1".into()).unwrap();
        assert_eq!(t1.amount_paid, 400);
        assert_eq!(t1.balance_due, 600);
        assert_eq!(t1.status, TransactionStatus::Partial);
        assert_eq!(books.account(&a1).unwrap().balance, 600);

        let debits: Vec<_> = books
            .account_ledger(&a1)
            .into_iter()
            .filter(|e| e.direction == Direction::Debit)
            .collect();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].amount, 400);
        assert!(books.audit_all().is_empty());
    }

    #[test]
    fn tax_and_prepaid_amounts() {
        let books = books();
        let a1 = account(&books, "A1");
        let t = books
            .create_transaction(
                NewTransaction::new(a1.clone(), vec![LineItem::new("oil", 2, 500)])
                    .tax_percent(10)
                    .amount_paid(300),
            )
            .unwrap();
        assert_eq!(t.total, 1100);
        assert_eq!(t.balance_due, 800);
        assert_eq!(t.status, TransactionStatus::Partial);
        assert_eq!(books.account(&a1).unwrap().balance, 800);
    }

    #[test]
    fn fully_prepaid_has_no_entry() {
        let books = books();
        let a1 = account(&books, "A1");
        let t = books
            .create_transaction(NewTransaction::new(a1.clone(), items(500)).amount_paid(500))
            .unwrap();
        assert_eq!(t.status, TransactionStatus::Paid);
        assert!(books.account_ledger(&a1).is_empty());
        assert_eq!(books.account(&a1).unwrap().balance, 0);
    }

    #[test]
    fn draft_has_no_entry_until_finalized() {
        let books = books();
        let a1 = account(&books, "A1");
        let draft = books
            .create_transaction(NewTransaction::new(a1.clone(), items(700)).draft())
            .unwrap();
        assert_eq!(draft.status, TransactionStatus::Draft);
        assert!(books.account_ledger(&a1).is_empty());

        let payment = books.record_payment(NewPayment::new(a1.clone(), 100).against(draft.client_id.clone()));
        assert!(matches!(payment, Err(CoreError::InvalidOperation { .. })));

        let final_txn = books.finalize_transaction(&draft.client_id).unwrap();
        assert_eq!(final_txn.status, TransactionStatus::Pending);
        assert_eq!(books.account_ledger(&a1).len(), 1);
        assert_eq!(books.account(&a1).unwrap().balance, 700);

        assert!(books.finalize_transaction(&draft.client_id).is_err());
        assert_eq!(books.account_ledger(&a1).len(), 1);
    }

    #[test]
    fn draft_cannot_be_prepaid() {
        let books = books();
        let a1 = account(&books, "A1");
        let result = books.create_transaction(NewTransaction::new(a1, items(700)).draft().amount_paid(10));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn unknown_account_is_rejected_atomically() {
        let books = books();
        let result = books.create_transaction(NewTransaction::new("nope".into(), items(100)));
        assert!(matches!(result, Err(CoreError::UnknownReference { .. })));
        assert!(books.store().outbox_pending().is_empty());
        assert!(books.store().all::<Transaction>().is_empty());
    }

    #[test]
    fn operations_enqueue_outbox_items() {
        let books = books();
        let a1 = account(&books, "A1");
        books
            .create_transaction(NewTransaction::new(a1.clone(), items(100)).with_client_id("T1".into()))
            .unwrap();
        books
            .record_payment(NewPayment::new(a1, 40).against("T1".into()))
            .unwrap();
        let classes = outbox_classes(&books.store().outbox_pending());
        assert_eq!(
            classes,
            vec![
                EntityClass::Account,
                EntityClass::Transaction,
                EntityClass::LedgerEntry,
                EntityClass::Transaction,
                EntityClass::Payment,
                EntityClass::LedgerEntry,
            ]
        );
    }

    #[test]
    fn overpayment_makes_balance_negative() {
        let books = books();
        let a1 = account(&books, "A1");
        books
            .create_transaction(NewTransaction::new(a1.clone(), items(100)).with_client_id("T1".into()))
            .unwrap();
        books
            .record_payment(NewPayment::new(a1.clone(), 150).against("T1".into()))
            .unwrap();
        let t1 = books.transaction(&"T1".into()).unwrap();
        assert_eq!(t1.balance_due, 0);
        assert_eq!(t1.status, TransactionStatus::Paid);
        assert_eq!(books.account(&a1).unwrap().balance, -50);
    }

    #[test]
    fn payment_must_match_transaction_account() {
        let books = books();
        let a1 = account(&books, "A1");
        let a2 = account(&books, "A2");
        books
            .create_transaction(NewTransaction::new(a1, items(100)).with_client_id("T1".into()))
            .unwrap();
        let result = books.record_payment(NewPayment::new(a2, 10).against("T1".into()));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn adjustment_and_recalculate() {
        let books = books();
        let a1 = account(&books, "A1");
        books
            .adjust(Adjustment {
                account_id: a1.clone(),
                direction: Direction::Credit,
                amount: 250,
                description: None,
            })
            .unwrap();
        assert_eq!(books.account(&a1).unwrap().balance, 250);
        let zero = books.adjust(Adjustment {
            account_id: a1.clone(),
            direction: Direction::Debit,
            amount: 0,
            description: None,
        });
        assert!(matches!(zero, Err(CoreError::Validation(_))));

        books
            .store()
            .write(|txn| {
                let mut account: Account = load(txn, &a1)?;
                account.balance = 9999;
                txn.put(account)
            })
            .unwrap();
        let drift = books.audit(&a1).unwrap().unwrap();
        assert_eq!(drift.derived, 250);
        assert_eq!(books.recalculate(&a1).unwrap(), 250);
        assert!(books.audit(&a1).unwrap().is_none());
        assert!(books.recalculate_all().unwrap().is_empty());

        let report = books.balance_report(&a1).unwrap();
        assert_eq!(report.balance, 250);
        assert_eq!(report.entry_count, 1);
    }

    #[test]
    fn overdue_marking() {
        let books = books();
        let a1 = account(&books, "A1");
        let due = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        books
            .create_transaction(NewTransaction::new(a1.clone(), items(100)).due_date(due).with_client_id("T1".into()))
            .unwrap();
        books
            .create_transaction(NewTransaction::new(a1, items(100)).with_client_id("T2".into()))
            .unwrap();

        assert!(books.mark_overdue(due).unwrap().is_empty());
        let flagged = books.mark_overdue(due.succ_opt().unwrap()).unwrap();
        assert_eq!(flagged, vec![ClientId::from("T1")]);
        assert_eq!(
            books.transaction(&"T1".into()).unwrap().status,
            TransactionStatus::Overdue
        );
        assert!(books.mark_overdue(due.succ_opt().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn notify_and_update_account() {
        let books = books();
        let a1 = account(&books, "A1");
        let t = books
            .create_transaction(NewTransaction::new(a1.clone(), items(100)))
            .unwrap();
        assert!(books.mark_notified(&t.client_id).unwrap());
        assert!(!books.mark_notified(&t.client_id).unwrap());

        let updated = books
            .update_account(
                &a1,
                AccountPatch {
                    phone: Some("555-0100".into()),
                    ..AccountPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.phone, "555-0100");
        assert_eq!(updated.balance, 100);
        assert!(books.update_account(&"missing".into(), AccountPatch::default()).is_err());
    }

    #[test]
    fn top_debtors_ordering() {
        let books = books();
        for (id, amount) in [("A1", 300u64), ("A2", 900), ("A3", 50)] {
            let a = account(&books, id);
            books
                .create_transaction(NewTransaction::new(a, items(amount)))
                .unwrap();
        }
        account(&books, "A4");
        let top: Vec<_> = books.top_debtors(2).into_iter().map(|a| a.client_id).collect();
        assert_eq!(top, vec![ClientId::from("A2"), ClientId::from("A1")]);
    }

    #[test]
    fn duplicate_account_id_rejected() {
        let books = books();
        account(&books, "A1");
        assert!(books
            .create_account(NewAccount::new("Other").with_client_id("A1".into()))
            .is_err());
    }
}
