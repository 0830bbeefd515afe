//! Ledger reports and repairs.

use super::{CliResult, Context};
use chrono::{NaiveDate, Utc};
use ledgersync_core::Drift;
use ledgersync_protocol::{Account, BalanceReport, ClientId, LedgerEntry};
use serde::Serialize;
use tracing::{info, warn};

/// An account's ledger, newest first.
pub fn ledger(ctx: &Context, account: &str) -> CliResult<Vec<LedgerEntry>> {
    let entries = ctx.books()?.account_ledger(&ClientId::from(account));
    ctx.emit(&entries, |entries| {
        if entries.is_empty() {
            return "No entries.".to_string();
        }
        entries
            .iter()
            .map(|e| {
                format!(
                    "{} {:<6} {:>12} {:<11} {}",
                    e.created_at.format("%Y-%m-%d %H:%M"),
                    e.direction,
                    e.amount,
                    e.source,
                    e.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(entries)
}

/// Balance by full recomputation.
pub fn balance(ctx: &Context, account: &str) -> CliResult<BalanceReport> {
    let report = ctx.books()?.balance_report(&ClientId::from(account))?;
    ctx.emit(&report, |r| {
        format!("{}: balance {} over {} entries", r.account_id, r.balance, r.entry_count)
    })?;
    Ok(report)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recalculated {
    account_id: ClientId,
    balance: i64,
}

/// Repairs one account, or every drifted account with `all`.
pub fn recalculate(ctx: &Context, account: Option<&str>, all: bool) -> CliResult<Vec<Drift>> {
    let books = ctx.books()?;
    if all {
        let repaired = books.recalculate_all()?;
        info!(repaired = repaired.len(), "recalculated all accounts");
        ctx.emit(repaired.as_slice(), drift_lines)?;
        return Ok(repaired);
    }

    let account = ClientId::from(account.ok_or("an account id or --all is required")?);
    let drift = books.audit(&account)?;
    let balance = books.recalculate(&account)?;
    ctx.emit(
        &Recalculated {
            account_id: account.clone(),
            balance,
        },
        |r| format!("{}: balance {}", r.account_id, r.balance),
    )?;
    Ok(drift.into_iter().collect())
}

fn drift_lines(drifts: &[Drift]) -> String {
    if drifts.is_empty() {
        return "All cached balances match the ledger.".to_string();
    }
    drifts
        .iter()
        .map(|d| {
            format!(
                "{}: cached {} ledger {} (off by {})",
                d.account_id,
                d.cached,
                d.derived,
                d.difference()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lists accounts whose cached balance disagrees with their ledger.
pub fn audit(ctx: &Context) -> CliResult<Vec<Drift>> {
    let drifts = ctx.books()?.audit_all();
    for drift in &drifts {
        warn!(account = %drift.account_id, cached = drift.cached, derived = drift.derived, "balance drift");
    }
    ctx.emit(drifts.as_slice(), drift_lines)?;
    Ok(drifts)
}

/// Flags open transactions past their due date.
pub fn overdue(ctx: &Context, today: Option<NaiveDate>) -> CliResult<Vec<ClientId>> {
    let today = today.unwrap_or_else(|| Utc::now().date_naive());
    let flagged = ctx.books()?.mark_overdue(today)?;
    ctx.emit(&flagged, |ids| {
        if ids.is_empty() {
            "Nothing overdue.".to_string()
        } else {
            ids.iter()
                .map(|id| format!("{id} overdue"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    })?;
    Ok(flagged)
}

/// Accounts owing the most.
pub fn debtors(ctx: &Context, limit: usize) -> CliResult<Vec<Account>> {
    let accounts = ctx.books()?.top_debtors(limit);
    ctx.emit(&accounts, |accounts| {
        accounts
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{:>3}. {:<24} {:>12}", i + 1, a.name, a.balance))
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(accounts)
}
