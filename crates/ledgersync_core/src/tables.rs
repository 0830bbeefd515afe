//! In-memory tables materialized from the journal.

use crate::journal::WriteOp;
use crate::outbox::{OutboxId, OutboxItem};
use ledgersync_protocol::{Account, ClientId, Entity, EntityClass, LedgerEntry, Payment, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A store table. Tables come into existence through migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Accounts.
    Accounts,
    /// Transactions.
    Transactions,
    /// Ledger entries.
    LedgerEntries,
    /// Payments.
    Payments,
    /// Pending outbound mutations.
    Outbox,
}

impl Table {
    /// Table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Table::Accounts => "accounts",
            Table::Transactions => "transactions",
            Table::LedgerEntries => "ledger_entries",
            Table::Payments => "payments",
            Table::Outbox => "outbox",
        }
    }

    /// The table holding records of `class`.
    #[must_use]
    pub const fn for_class(class: EntityClass) -> Self {
        match class {
            EntityClass::Account => Table::Accounts,
            EntityClass::Transaction => Table::Transactions,
            EntityClass::LedgerEntry => Table::LedgerEntries,
            EntityClass::Payment => Table::Payments,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record as it is written to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "record", rename_all = "snake_case")]
pub enum Record {
    /// An account.
    Account(Account),
    /// A transaction.
    Transaction(Transaction),
    /// A ledger entry.
    LedgerEntry(LedgerEntry),
    /// A payment.
    Payment(Payment),
}

/// All store state. Readers see it behind a lock; writers mutate it only by
/// applying committed [`WriteOp`]s.
#[derive(Debug, Default)]
pub struct Tables {
    pub(crate) created: BTreeSet<Table>,
    pub(crate) accounts: BTreeMap<ClientId, Account>,
    pub(crate) transactions: BTreeMap<ClientId, Transaction>,
    pub(crate) ledger: BTreeMap<ClientId, LedgerEntry>,
    pub(crate) payments: BTreeMap<ClientId, Payment>,
    pub(crate) outbox: BTreeMap<OutboxId, OutboxItem>,
    pub(crate) schema_version: u32,
    pub(crate) sequence: u64,
    pub(crate) next_outbox_id: u64,
}

impl Tables {
    pub(crate) fn new() -> Self {
        Self {
            next_outbox_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn has_table(&self, table: Table) -> bool {
        self.created.contains(&table)
    }

    pub(crate) fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::CreateTable(table) => {
                self.created.insert(table);
            }
            WriteOp::Put(record) => match record {
                Record::Account(r) => put(&mut self.accounts, r),
                Record::Transaction(r) => put(&mut self.transactions, r),
                Record::LedgerEntry(r) => put(&mut self.ledger, r),
                Record::Payment(r) => put(&mut self.payments, r),
            },
            WriteOp::Enqueue(item) => {
                self.next_outbox_id = self.next_outbox_id.max(item.id.as_u64() + 1);
                self.outbox.insert(item.id, item);
            }
            WriteOp::RemoveOutbox(ids) => {
                for id in ids {
                    self.outbox.remove(&id);
                }
            }
            WriteOp::SetSchemaVersion(version) => self.schema_version = version,
        }
    }
}

fn put<T: Entity>(table: &mut BTreeMap<ClientId, T>, record: T) {
    table.insert(record.client_id().clone(), record);
}

/// An entity type with a table in the store.
pub trait Stored: Entity {
    /// The table holding this type.
    const TABLE: Table;

    #[doc(hidden)]
    fn table(tables: &Tables) -> &BTreeMap<ClientId, Self>;

    #[doc(hidden)]
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ClientId, Self>;

    #[doc(hidden)]
    fn into_record(self) -> Record;
}

macro_rules! stored {
    ($ty:ty, $table:expr, $field:ident, $variant:ident) => {
        impl Stored for $ty {
            const TABLE: Table = $table;

            fn table(tables: &Tables) -> &BTreeMap<ClientId, Self> {
                &tables.$field
            }

            fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ClientId, Self> {
                &mut tables.$field
            }

            fn into_record(self) -> Record {
                Record::$variant(self)
            }
        }
    };
}

stored!(Account, Table::Accounts, accounts, Account);
stored!(Transaction, Table::Transactions, transactions, Transaction);
stored!(LedgerEntry, Table::LedgerEntries, ledger, LedgerEntry);
stored!(Payment, Table::Payments, payments, Payment);
