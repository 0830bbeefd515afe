//! Account commands.

use super::{CliResult, Context};
use clap::ValueEnum;
use ledgersync_core::{AccountPatch, NewAccount};
use ledgersync_protocol::{Account, AccountStatus, ClientId};
use tracing::info;

/// Account status as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// In use.
    Active,
    /// Retired.
    Inactive,
}

impl From<StatusArg> for AccountStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Active => AccountStatus::Active,
            StatusArg::Inactive => AccountStatus::Inactive,
        }
    }
}

fn line(account: &Account) -> String {
    format!(
        "{:<38} {:<24} {:>12} {:?}{}",
        account.client_id,
        account.name,
        account.balance,
        account.status,
        if account.synced { "" } else { "  (unsynced)" }
    )
}

/// Creates an account.
pub fn add(ctx: &Context, name: &str, phone: Option<String>, address: Option<String>) -> CliResult<Account> {
    let mut input = NewAccount::new(name);
    if let Some(phone) = phone {
        input = input.phone(phone);
    }
    if let Some(address) = address {
        input = input.address(address);
    }
    let account = ctx.books()?.create_account(input)?;
    info!(account = %account.client_id, "account created");
    ctx.emit(&account, line)?;
    Ok(account)
}

/// Lists every account.
pub fn list(ctx: &Context) -> CliResult<Vec<Account>> {
    let accounts = ctx.books()?.accounts();
    ctx.emit(&accounts, |accounts| {
        if accounts.is_empty() {
            return "No accounts.".to_string();
        }
        accounts.iter().map(line).collect::<Vec<_>>().join("\n")
    })?;
    Ok(accounts)
}

/// Applies a partial update.
pub fn update(
    ctx: &Context,
    id: &str,
    name: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    status: Option<StatusArg>,
) -> CliResult<Account> {
    let patch = AccountPatch {
        name,
        phone,
        address,
        status: status.map(Into::into),
    };
    if patch.is_empty() {
        return Err("nothing to update".into());
    }
    let account = ctx.books()?.update_account(&ClientId::from(id), patch)?;
    ctx.emit(&account, line)?;
    Ok(account)
}
