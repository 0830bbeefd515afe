//! Schema migration command.

use super::{CliResult, Context};
use ledgersync_core::migration::MigrationInfo;
use ledgersync_core::{EntityStore, MigrationManager};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MigrationLine {
    version: u32,
    name: String,
    applied: bool,
}

/// Migration state after the command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Schema version before.
    pub from_version: u32,
    /// Schema version after.
    pub to_version: u32,
    /// Names of migrations applied by this run.
    pub applied: Vec<String>,
    migrations: Vec<MigrationLine>,
}

/// Lists the built-in migrations and applies the pending ones, unless
/// `dry_run`.
pub fn run(ctx: &Context, dry_run: bool) -> CliResult<MigrationReport> {
    let config = ctx.settings.store_config().auto_migrate(false);
    let store = EntityStore::open(&ctx.store_dir, config)?;
    let manager = MigrationManager::builtin();
    let from_version = store.schema_version();

    let applied = if dry_run {
        Vec::new()
    } else {
        store
            .migrate(&manager)?
            .applied
            .into_iter()
            .map(|m| m.name)
            .collect()
    };
    let to_version = store.schema_version();
    let migrations = manager
        .list()
        .into_iter()
        .map(|MigrationInfo { version, name }| MigrationLine {
            version,
            name,
            applied: version <= to_version,
        })
        .collect();

    let report = MigrationReport {
        from_version,
        to_version,
        applied,
        migrations,
    };
    ctx.emit(&report, |r| {
        let mut text = format!("schema v{} -> v{}", r.from_version, r.to_version);
        for m in &r.migrations {
            let mark = if m.applied { "applied" } else { "pending" };
            text.push_str(&format!("\n  v{}: {} [{mark}]", m.version, m.name));
        }
        text
    })?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;

    #[test]
    fn dry_run_then_apply() {
        let (ctx, _dir) = context();
        let preview = run(&ctx, true).unwrap();
        assert_eq!(preview.from_version, 0);
        assert_eq!(preview.to_version, 0);
        assert!(preview.migrations.iter().all(|m| !m.applied));

        let report = run(&ctx, false).unwrap();
        assert_eq!(report.to_version, 2);
        assert_eq!(report.applied.len(), 2);

        let again = run(&ctx, false).unwrap();
        assert!(again.applied.is_empty());
    }
}
