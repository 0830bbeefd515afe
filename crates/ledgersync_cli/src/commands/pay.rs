//! Payment and adjustment commands.

use super::{CliResult, Context};
use clap::ValueEnum;
use ledgersync_core::{Adjustment, NewPayment};
use ledgersync_protocol::{ClientId, Direction, LedgerEntry, Payment, PaymentMethod};
use tracing::info;

/// Entry direction as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    /// Raises what the account owes.
    Credit,
    /// Lowers what the account owes.
    Debit,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Credit => Direction::Credit,
            DirectionArg::Debit => Direction::Debit,
        }
    }
}

/// Records a payment, optionally against a transaction.
pub fn pay(
    ctx: &Context,
    account: &str,
    amount: u64,
    against: Option<String>,
    method: &str,
    note: Option<String>,
) -> CliResult<Payment> {
    let method: PaymentMethod = method.parse()?;
    let mut input = NewPayment::new(ClientId::from(account), amount).method(method);
    if let Some(txn) = against {
        input = input.against(ClientId::from(txn));
    }
    if let Some(note) = note {
        input = input.note(note);
    }
    let payment = ctx.books()?.record_payment(input)?;
    info!(payment = %payment.client_id, amount, "payment recorded");
    ctx.emit(&payment, |p| {
        format!("payment {} of {} by {} from {}", p.client_id, p.amount, p.method, p.account_id)
    })?;
    Ok(payment)
}

/// Posts a manual ledger correction.
pub fn adjust(
    ctx: &Context,
    account: &str,
    direction: DirectionArg,
    amount: u64,
    description: Option<String>,
) -> CliResult<LedgerEntry> {
    let mut adjustment = Adjustment::new(ClientId::from(account), direction.into(), amount);
    if let Some(description) = description {
        adjustment = adjustment.describe(description);
    }
    let entry = ctx.books()?.adjust(adjustment)?;
    ctx.emit(&entry, |e| format!("{} {} {}: {}", e.client_id, e.direction, e.amount, e.description))?;
    Ok(entry)
}
