//! Sync commands against a reconciler over a second store directory.

use super::{CliResult, Context};
use ledgersync_core::EntityStore;
use ledgersync_protocol::{BalanceReport, ClientId};
use ledgersync_sync_engine::{
    HttpFailure, HttpTransport, LoopbackClient, LoopbackServer, StoreApplier, SyncApplier,
    SyncEngine, SyncReport, SyncTransport,
};
use ledgersync_sync_server::{ServerError, SyncServer};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A reconciler reached through the loopback HTTP client.
pub struct RemoteBooks(SyncServer);

fn failure(err: ServerError) -> HttpFailure {
    HttpFailure::Status {
        code: err.status_code(),
        message: err.to_string(),
    }
}

impl LoopbackServer for RemoteBooks {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure> {
        self.0.handle_post(path, body).map_err(failure)
    }

    fn handle_get(&self, path: &str) -> Result<Vec<u8>, HttpFailure> {
        self.0.handle_get(path).map_err(failure)
    }
}

type RemoteTransport = HttpTransport<LoopbackClient<RemoteBooks>>;

fn transport(ctx: &Context, remote: &Path) -> CliResult<RemoteTransport> {
    let server = SyncServer::open(remote, ctx.settings.server_config())?;
    Ok(HttpTransport::from_config(
        &ctx.settings.sync_config(),
        LoopbackClient::new(RemoteBooks(server)),
    ))
}

/// Pending work and store facts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
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
    /// Schema version.
    pub schema_version: u32,
    /// Commits in the journal.
    pub sequence: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

/// Shows what still waits for the remote.
pub fn status(ctx: &Context) -> CliResult<Status> {
    let store = ctx.open_store()?;
    let pending = StoreApplier::new(Arc::clone(&store)).pending_summary()?;
    let status = Status {
        accounts: pending.accounts,
        transactions: pending.transactions,
        ledger: pending.ledger,
        payments: pending.payments,
        outbox: pending.outbox,
        schema_version: store.schema_version(),
        sequence: store.sequence(),
        journal_bytes: store.journal_size()?,
    };
    ctx.emit(&status, |s| {
        format!(
            "pending: {} accounts, {} transactions, {} ledger entries, {} payments\noutbox: {}\nschema v{}, {} commits, {} bytes",
            s.accounts, s.transactions, s.ledger, s.payments, s.outbox, s.schema_version, s.sequence, s.journal_bytes
        )
    })?;
    Ok(status)
}

/// Outcome of `sync`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Records sent.
    pub pushed: usize,
    /// Records now synced.
    pub synced: usize,
    /// Records the remote rejected.
    pub rejected: usize,
    /// Notifications handed off.
    pub notified: usize,
    /// Per-record errors.
    pub errors: Vec<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u128,
}

impl From<&SyncReport> for SyncSummary {
    fn from(report: &SyncReport) -> Self {
        Self {
            pushed: report.pushed,
            synced: report.synced,
            rejected: report.rejected,
            notified: report.notified,
            errors: report.errors.clone(),
            duration_ms: report.duration.as_millis(),
        }
    }
}

/// Pushes pending work to the reconciler at `remote`, retrying transient
/// failures.
pub fn sync(ctx: &Context, remote: &Path) -> CliResult<SyncSummary> {
    let store: Arc<EntityStore> = ctx.open_store()?;
    let engine = SyncEngine::new(
        ctx.settings.sync_config(),
        transport(ctx, remote)?,
        StoreApplier::new(store),
    );
    let report = engine.sync_with_retry()?;
    info!(synced = report.synced, rejected = report.rejected, "sync finished");

    let summary = SyncSummary::from(&report);
    ctx.emit(&summary, |s| {
        let mut text = format!(
            "pushed {}, synced {}, rejected {}, notified {} in {} ms",
            s.pushed, s.synced, s.rejected, s.notified, s.duration_ms
        );
        for error in &s.errors {
            text.push_str("\n  ");
            text.push_str(error);
        }
        text
    })?;
    Ok(summary)
}

/// Asks the remote for an account's ledger balance.
pub fn remote_balance(ctx: &Context, remote: &Path, account: &str) -> CliResult<BalanceReport> {
    let report = transport(ctx, remote)?.balance(&ClientId::from(account))?;
    ctx.emit(&report, |r| {
        format!("{} (remote): balance {} over {} entries", r.account_id, r.balance, r.entry_count)
    })?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::sale::{self, SaleOptions};
    use crate::commands::{account, pay, testing::context};
    use ledgersync_protocol::LineItem;

    #[test]
    fn sync_to_directory_remote() {
        let (ctx, dir) = context();
        let remote = dir.path().join("remote");
        let acct = account::add(&ctx, "Ravi", None, None).unwrap().client_id;
        sale::create(&ctx, acct.as_str(), vec![LineItem::new("rice", 1, 1000)], SaleOptions::default()).unwrap();
        pay::pay(&ctx, acct.as_str(), 400, None, "cash", None).unwrap();
        assert_eq!(status(&ctx).unwrap().outbox, 5);

        let summary = sync(&ctx, &remote).unwrap();
        assert_eq!(summary.synced, 5);
        assert!(summary.errors.is_empty());

        let after = status(&ctx).unwrap();
        assert_eq!(after.outbox, 0);
        assert_eq!(after.accounts + after.transactions + after.ledger + after.payments, 0);

        let report = remote_balance(&ctx, &remote, acct.as_str()).unwrap();
        assert_eq!(report.balance, 600);
        assert_eq!(report.entry_count, 2);

        assert_eq!(sync(&ctx, &remote).unwrap().pushed, 0);
    }

    #[test]
    fn transport_uses_configured_timeout() {
        let (mut ctx, dir) = context();
        ctx.settings.sync.timeout_ms = 1_500;
        let transport = transport(&ctx, &dir.path().join("remote")).unwrap();
        assert_eq!(transport.timeout(), std::time::Duration::from_millis(1_500));
    }

    #[test]
    fn unknown_remote_account() {
        let (ctx, dir) = context();
        assert!(remote_balance(&ctx, &dir.path().join("remote"), "nobody").is_err());
    }
}
