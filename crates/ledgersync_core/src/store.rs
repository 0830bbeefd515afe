//! The entity store.
//!
//! Tables live in memory behind a lock and are rebuilt from the journal on
//! open. A write transaction stages its mutations, appends them to the
//! journal as one frame, and only then makes them visible to readers. At
//! most one write transaction runs at a time; readers are never blocked by
//! a writer's closure, only by the short apply step.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalRecord, WriteOp};
use crate::migration::{MigrationManager, MigrationRunResult};
use crate::outbox::{OutboxAction, OutboxId, OutboxItem};
use crate::tables::{Stored, Table, Tables};
use chrono::Utc;
use ledgersync_protocol::{ClientId, EntityClass};
use ledgersync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Durable local tables for accounts, transactions, payments, ledger entries
/// and the outbox.
///
/// # Example
///
/// ```rust
/// use ledgersync_core::EntityStore;
/// use ledgersync_protocol::{Account, EntityClass};
/// use ledgersync_core::OutboxAction;
///
/// let store = EntityStore::open_in_memory().unwrap();
/// store.write(|txn| {
///     let account = Account::new("A1".into(), "Ravi");
///     txn.put(account)?;
///     txn.enqueue(EntityClass::Account, "A1".into(), OutboxAction::Create)?;
///     Ok(())
/// }).unwrap();
///
/// assert_eq!(store.all::<Account>().len(), 1);
/// assert_eq!(store.outbox_pending().len(), 1);
/// ```
pub struct EntityStore {
    dir: Option<StoreDir>,
    journal: Mutex<Journal>,
    tables: RwLock<Tables>,
}

impl EntityStore {
    /// Opens a file-backed store in `path`.
    ///
    /// Replays the journal, truncating a torn tail, and applies the built-in
    /// migrations unless `config.auto_migrate` is off.
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        info!(path = %dir.path().display(), "opening entity store");
        Self::open_inner(Some(dir), Box::new(backend), &config)
    }

    /// Opens an ephemeral store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), &StoreConfig::default())
    }

    /// Opens a store over an arbitrary journal backend.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
    ) -> CoreResult<Self> {
        Self::open_inner(None, backend, config)
    }

    fn open_inner(
        dir: Option<StoreDir>,
        backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
    ) -> CoreResult<Self> {
        let (journal, records) = Journal::open(backend, config.sync_on_commit)?;

        let mut tables = Tables::new();
        let replayed = records.len();
        for record in records {
            tables.sequence = record.sequence;
            for op in record.ops {
                tables.apply(op);
            }
        }
        info!(
            replayed,
            sequence = tables.sequence,
            schema_version = tables.schema_version,
            "entity store recovered"
        );

        let store = Self {
            dir,
            journal: Mutex::new(journal),
            tables: RwLock::new(tables),
        };

        if config.auto_migrate {
            store.migrate(&MigrationManager::builtin())?;
        }
        Ok(store)
    }

    /// Applies pending migrations from `manager`.
    pub fn migrate(&self, manager: &MigrationManager) -> CoreResult<MigrationRunResult> {
        manager.run_pending(self)
    }

    /// Runs `f` as one atomic write transaction.
    ///
    /// Reads through the transaction see its own pending writes. If `f`
    /// returns an error nothing is written. The commit is durable before any
    /// reader can observe it.
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> CoreResult<T>,
    {
        let guard = self.tables.upgradable_read();
        let (value, ops) = {
            let mut txn = WriteTxn::new(&guard);
            let value = f(&mut txn)?;
            (value, txn.ops)
        };
        if ops.is_empty() {
            return Ok(value);
        }

        let record = JournalRecord {
            sequence: guard.sequence + 1,
            committed_at: Utc::now(),
            ops,
        };
        self.journal.lock().append(&record)?;

        let mut tables = RwLockUpgradableReadGuard::upgrade(guard);
        tables.sequence = record.sequence;
        let op_count = record.ops.len();
        for op in record.ops {
            tables.apply(op);
        }
        debug!(sequence = record.sequence, ops = op_count, "committed");
        Ok(value)
    }

    /// Runs `f` against a consistent snapshot of every table.
    pub fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&ReadView<'_>) -> T,
    {
        let guard = self.tables.read();
        f(&ReadView { tables: &guard })
    }

    /// Looks up a record by client id.
    #[must_use]
    pub fn get<T: Stored>(&self, client_id: &ClientId) -> Option<T> {
        T::table(&self.tables.read()).get(client_id).cloned()
    }

    /// Returns every record of a type.
    #[must_use]
    pub fn all<T: Stored>(&self) -> Vec<T> {
        T::table(&self.tables.read()).values().cloned().collect()
    }

    /// Returns the records of a type matching `predicate`.
    pub fn query<T, P>(&self, predicate: P) -> Vec<T>
    where
        T: Stored,
        P: Fn(&T) -> bool,
    {
        T::table(&self.tables.read())
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    /// Returns the outbox in enqueue order.
    #[must_use]
    pub fn outbox_pending(&self) -> Vec<OutboxItem> {
        self.tables.read().outbox.values().cloned().collect()
    }

    /// Current schema version.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.tables.read().schema_version
    }

    /// Sequence number of the last commit.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.tables.read().sequence
    }

    /// Size of the journal in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.journal.lock().size()
    }

    /// Directory of a file-backed store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("path", &self.path())
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}

/// A consistent read-only snapshot.
pub struct ReadView<'a> {
    tables: &'a Tables,
}

impl<'a> ReadView<'a> {
    /// Looks up a record by client id.
    #[must_use]
    pub fn get<T: Stored>(&self, client_id: &ClientId) -> Option<&'a T> {
        T::table(self.tables).get(client_id)
    }

    /// Iterates every record of a type in client id order.
    pub fn all<T: Stored>(&self) -> impl Iterator<Item = &'a T> + 'a {
        T::table(self.tables).values()
    }

    /// Returns the records of a type matching `predicate`.
    pub fn query<T, P>(&self, predicate: P) -> Vec<&'a T>
    where
        T: Stored,
        P: Fn(&T) -> bool,
    {
        T::table(self.tables)
            .values()
            .filter(|r| predicate(r))
            .collect()
    }

    /// Iterates the outbox in enqueue order.
    pub fn outbox(&self) -> impl Iterator<Item = &'a OutboxItem> + 'a {
        self.tables.outbox.values()
    }

    /// Returns true if `table` exists.
    #[must_use]
    pub fn has_table(&self, table: Table) -> bool {
        self.tables.has_table(table)
    }

    /// Schema version of the snapshot.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.tables.schema_version
    }

    /// Commit sequence of the snapshot.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.tables.sequence
    }
}

/// A write transaction in progress. See [`EntityStore::write`].
pub struct WriteTxn<'a> {
    base: &'a Tables,
    staged: Tables,
    removed_outbox: BTreeSet<OutboxId>,
    ops: Vec<WriteOp>,
}

impl<'a> WriteTxn<'a> {
    fn new(base: &'a Tables) -> Self {
        Self {
            base,
            staged: Tables {
                schema_version: base.schema_version,
                next_outbox_id: base.next_outbox_id,
                ..Tables::default()
            },
            removed_outbox: BTreeSet::new(),
            ops: Vec::new(),
        }
    }

    /// Returns true if `table` exists, counting tables created in this
    /// transaction.
    #[must_use]
    pub fn has_table(&self, table: Table) -> bool {
        self.base.has_table(table) || self.staged.has_table(table)
    }

    fn require_table(&self, table: Table) -> CoreResult<()> {
        if self.has_table(table) {
            Ok(())
        } else {
            Err(CoreError::TableMissing { table })
        }
    }

    /// Looks up a record, seeing this transaction's own writes.
    #[must_use]
    pub fn get<T: Stored>(&self, client_id: &ClientId) -> Option<&T> {
        T::table(&self.staged)
            .get(client_id)
            .or_else(|| T::table(self.base).get(client_id))
    }

    /// Returns true if a record with `client_id` exists.
    #[must_use]
    pub fn contains<T: Stored>(&self, client_id: &ClientId) -> bool {
        self.get::<T>(client_id).is_some()
    }

    /// Returns every record of a type, seeing this transaction's own writes.
    #[must_use]
    pub fn all<T: Stored>(&self) -> Vec<T> {
        self.query(|_: &T| true)
    }

    /// Returns the records of a type matching `predicate`.
    pub fn query<T, P>(&self, predicate: P) -> Vec<T>
    where
        T: Stored,
        P: Fn(&T) -> bool,
    {
        let mut merged: BTreeMap<&ClientId, &T> = T::table(self.base).iter().collect();
        merged.extend(T::table(&self.staged).iter());
        merged
            .into_values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TableMissing`] if no migration created the table
    /// - [`CoreError::Validation`] if the record is invalid
    /// - [`CoreError::AppendOnlyViolation`] when changing an existing ledger
    ///   entry or payment in anything but its synced flag
    pub fn put<T: Stored>(&mut self, record: T) -> CoreResult<()> {
        self.require_table(T::TABLE)?;
        record.validate()?;
        if T::CLASS.is_append_only() {
            if let Some(existing) = self.get::<T>(record.client_id()) {
                if !existing.same_content(&record) {
                    return Err(CoreError::AppendOnlyViolation {
                        class: T::CLASS,
                        client_id: record.client_id().clone(),
                    });
                }
            }
        }
        T::table_mut(&mut self.staged).insert(record.client_id().clone(), record.clone());
        self.ops.push(WriteOp::Put(record.into_record()));
        Ok(())
    }

    /// Appends an outbox item for a local mutation.
    pub fn enqueue(
        &mut self,
        class: EntityClass,
        client_id: ClientId,
        action: OutboxAction,
    ) -> CoreResult<OutboxId> {
        self.require_table(Table::Outbox)?;
        let id = OutboxId::new(self.staged.next_outbox_id);
        self.staged.next_outbox_id += 1;
        let item = OutboxItem {
            id,
            class,
            client_id,
            action,
            enqueued_at: Utc::now(),
        };
        self.staged.outbox.insert(id, item.clone());
        self.ops.push(WriteOp::Enqueue(item));
        Ok(id)
    }

    /// Returns the outbox as this transaction sees it.
    #[must_use]
    pub fn outbox(&self) -> Vec<OutboxItem> {
        self.base
            .outbox
            .values()
            .chain(self.staged.outbox.values())
            .filter(|item| !self.removed_outbox.contains(&item.id))
            .cloned()
            .collect()
    }

    /// Removes outbox items; unknown ids are ignored. Returns how many were
    /// removed.
    pub fn remove_outbox(&mut self, ids: &[OutboxId]) -> CoreResult<usize> {
        self.require_table(Table::Outbox)?;
        let mut removed = Vec::new();
        for id in ids {
            let present =
                self.base.outbox.contains_key(id) || self.staged.outbox.contains_key(id);
            if present && self.removed_outbox.insert(*id) {
                self.staged.outbox.remove(id);
                removed.push(*id);
            }
        }
        let count = removed.len();
        if !removed.is_empty() {
            self.ops.push(WriteOp::RemoveOutbox(removed));
        }
        Ok(count)
    }

    /// Creates a table. Returns false if it already exists.
    pub fn create_table(&mut self, table: Table) -> bool {
        if self.has_table(table) {
            return false;
        }
        self.staged.created.insert(table);
        self.ops.push(WriteOp::CreateTable(table));
        true
    }

    /// Schema version as this transaction sees it.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.staged.schema_version
    }

    pub(crate) fn set_schema_version(&mut self, version: u32) {
        self.staged.schema_version = version;
        self.ops.push(WriteOp::SetSchemaVersion(version));
    }
}
