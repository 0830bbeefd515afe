//! Schema migrations.
//!
//! Migrations are forward-only and run at store open, each in its own write
//! transaction that also records the new schema version. A migration whose
//! version is at or below the stored version is skipped, so running the list
//! again is a no-op.

use crate::error::{CoreError, CoreResult};
use crate::ledger;
use crate::store::{EntityStore, WriteTxn};
use crate::tables::Table;
use ledgersync_protocol::{Account, LedgerEntry};
use std::collections::BTreeMap;
use tracing::info;

/// Version number for migrations.
pub type MigrationVersion = u32;

/// Information about a registered migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version number (unique, sequential).
    pub version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
}

/// An operation performed during a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Created a table.
    CreateTable {
        /// The table.
        table: Table,
    },
    /// Anything else, described in prose.
    Custom {
        /// Description of the operation.
        description: String,
    },
}

/// A migration that was applied.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    /// Version number.
    pub version: MigrationVersion,
    /// Migration name.
    pub name: String,
    /// What it did.
    pub operations: Vec<MigrationOperation>,
}

/// Result of running all pending migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Migrations applied by this run, in order.
    pub applied: Vec<AppliedMigration>,
    /// Schema version after the run.
    pub final_version: MigrationVersion,
}

/// Context passed to [`Migration::up`].
pub struct MigrationContext<'t, 'a> {
    txn: &'t mut WriteTxn<'a>,
    operations: Vec<MigrationOperation>,
}

impl<'t, 'a> MigrationContext<'t, 'a> {
    fn new(txn: &'t mut WriteTxn<'a>) -> Self {
        Self {
            txn,
            operations: Vec::new(),
        }
    }

    /// Creates a table if it does not exist.
    pub fn create_table(&mut self, table: Table) {
        if self.txn.create_table(table) {
            self.operations.push(MigrationOperation::CreateTable { table });
        }
    }

    /// Records a custom operation.
    pub fn custom(&mut self, description: impl Into<String>) {
        self.operations.push(MigrationOperation::Custom {
            description: description.into(),
        });
    }

    /// The write transaction the migration runs in.
    pub fn txn(&mut self) -> &mut WriteTxn<'a> {
        self.txn
    }
}

/// A schema migration step.
pub trait Migration: Send + Sync {
    /// Version number; versions start at 1 and have no gaps.
    fn version(&self) -> MigrationVersion;

    /// Name of this migration.
    fn name(&self) -> &str;

    /// Applies the migration. Must be idempotent.
    fn up(&self, ctx: &mut MigrationContext<'_, '_>) -> CoreResult<()>;
}

/// Holds registered migrations and applies the pending ones.
pub struct MigrationManager {
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// The built-in schema history.
    #[must_use]
    pub fn builtin() -> Self {
        let mut migrations: BTreeMap<MigrationVersion, Box<dyn Migration>> = BTreeMap::new();
        migrations.insert(1, Box::new(CreateCoreTables));
        migrations.insert(2, Box::new(AddLedgerAndPayments));
        Self { migrations }
    }

    /// Registers a migration.
    ///
    /// Returns an error if the version is already registered.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(CoreError::migration_failed(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Lists registered migrations in version order.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations
            .values()
            .map(|m| MigrationInfo {
                version: m.version(),
                name: m.name().to_string(),
            })
            .collect()
    }

    /// Latest registered version, or 0.
    #[must_use]
    pub fn latest_version(&self) -> MigrationVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Validates that versions start at 1 with no gaps.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, version) in self.migrations.keys().enumerate() {
            let expected = i as MigrationVersion + 1;
            if *version != expected {
                return Err(CoreError::migration_failed(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }

    /// Applies every migration above the store's schema version.
    ///
    /// Stops at the first failure; migrations applied before it stay
    /// applied.
    pub fn run_pending(&self, store: &EntityStore) -> CoreResult<MigrationRunResult> {
        self.validate()?;
        let mut result = MigrationRunResult {
            applied: Vec::new(),
            final_version: store.schema_version(),
        };

        for (version, migration) in &self.migrations {
            if *version <= result.final_version {
                continue;
            }
            let applied = store
                .write(|txn| {
                    if txn.schema_version() >= *version {
                        return Ok(None);
                    }
                    let mut ctx = MigrationContext::new(txn);
                    migration.up(&mut ctx)?;
                    let operations = ctx.operations;
                    txn.set_schema_version(*version);
                    Ok(Some(operations))
                })
                .map_err(|e| {
                    CoreError::migration_failed(format!(
                        "{} (v{version}): {e}",
                        migration.name()
                    ))
                })?;

            if let Some(operations) = applied {
                info!(version, name = migration.name(), "applied migration");
                result.applied.push(AppliedMigration {
                    version: *version,
                    name: migration.name().to_string(),
                    operations,
                });
            }
            result.final_version = *version;
        }
        Ok(result)
    }
}

/// v1: accounts, transactions and the outbox.
struct CreateCoreTables;

impl Migration for CreateCoreTables {
    fn version(&self) -> MigrationVersion {
        1
    }

    fn name(&self) -> &str {
        "create_core_tables"
    }

    fn up(&self, ctx: &mut MigrationContext<'_, '_>) -> CoreResult<()> {
        ctx.create_table(Table::Accounts);
        ctx.create_table(Table::Transactions);
        ctx.create_table(Table::Outbox);
        Ok(())
    }
}

/// v2: ledger entries and payments; cached balances are rebuilt from the
/// ledger.
struct AddLedgerAndPayments;

impl Migration for AddLedgerAndPayments {
    fn version(&self) -> MigrationVersion {
        2
    }

    fn name(&self) -> &str {
        "add_ledger_and_payments"
    }

    fn up(&self, ctx: &mut MigrationContext<'_, '_>) -> CoreResult<()> {
        ctx.create_table(Table::LedgerEntries);
        ctx.create_table(Table::Payments);

        let entries = ctx.txn().all::<LedgerEntry>();
        let mut backfilled = 0usize;
        for mut account in ctx.txn().all::<Account>() {
            let derived = ledger::balance_of(&account.client_id, &entries);
            if account.balance != derived {
                account.balance = derived;
                ctx.txn().put(account)?;
                backfilled += 1;
            }
        }
        if backfilled > 0 {
            ctx.custom(format!("backfilled {backfilled} account balances"));
        }
        Ok(())
    }
}
