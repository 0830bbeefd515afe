//! Transaction commands.

use super::{CliResult, Context};
use chrono::NaiveDate;
use clap::ValueEnum;
use ledgersync_core::NewTransaction;
use ledgersync_protocol::{ClientId, LineItem, Transaction, TransactionKind};
use tracing::info;

/// Transaction kind as typed on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Goods sold.
    #[default]
    Sale,
    /// Goods bought.
    Purchase,
}

impl From<KindArg> for TransactionKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Sale => TransactionKind::Sale,
            KindArg::Purchase => TransactionKind::Purchase,
        }
    }
}

/// Options for a new transaction beyond its account and items.
#[derive(Debug, Clone, Default)]
pub struct SaleOptions {
    /// Sale or purchase.
    pub kind: KindArg,
    /// Save as a draft.
    pub draft: bool,
    /// Paid up front.
    pub paid: u64,
    /// Tax rate in whole percent.
    pub tax_percent: u32,
    /// Due date for overdue tracking.
    pub due: Option<NaiveDate>,
    /// Free text.
    pub notes: Option<String>,
}

/// Parses `name:quantity:price`. The name may itself contain colons.
pub fn parse_item(arg: &str) -> Result<LineItem, String> {
    let mut parts = arg.rsplitn(3, ':');
    let (Some(price), Some(quantity), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected name:quantity:price, got '{arg}'"));
    };
    if name.trim().is_empty() {
        return Err(format!("item name missing in '{arg}'"));
    }
    let quantity = quantity
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad quantity in '{arg}': {e}"))?;
    let price = price
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("bad price in '{arg}': {e}"))?;
    Ok(LineItem::new(name.trim(), quantity, price))
}

fn line(txn: &Transaction) -> String {
    format!(
        "{} {} for {}: total {} paid {} due {} [{:?}]",
        txn.kind, txn.client_id, txn.account_id, txn.total, txn.amount_paid, txn.balance_due, txn.status
    )
}

/// Records a sale or purchase.
pub fn create(ctx: &Context, account: &str, items: Vec<LineItem>, options: SaleOptions) -> CliResult<Transaction> {
    let mut input = NewTransaction::new(ClientId::from(account), items)
        .kind(options.kind.into())
        .tax_percent(options.tax_percent)
        .amount_paid(options.paid);
    if options.draft {
        input = input.draft();
    }
    if let Some(due) = options.due {
        input = input.due_date(due);
    }
    if let Some(notes) = options.notes {
        input = input.notes(notes);
    }
    let txn = ctx.books()?.create_transaction(input)?;
    info!(transaction = %txn.client_id, total = txn.total, "transaction recorded");
    ctx.emit(&txn, line)?;
    Ok(txn)
}

/// Turns a draft into a final transaction.
pub fn finalize(ctx: &Context, id: &str) -> CliResult<Transaction> {
    let txn = ctx.books()?.finalize_transaction(&ClientId::from(id))?;
    ctx.emit(&txn, line)?;
    Ok(txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{account, testing::context};
    use ledgersync_protocol::TransactionStatus;

    #[test]
    fn item_parsing() {
        let item = parse_item("rice:2:150").unwrap();
        assert_eq!(item, LineItem::new("rice", 2, 150));
        assert_eq!(parse_item("cable 2:1m:1:40").unwrap().name, "cable 2:1m");
        assert!(parse_item("rice:2").is_err());
        assert!(parse_item(":2:150").is_err());
        assert!(parse_item("rice:two:150").is_err());
    }

    #[test]
    fn draft_then_finalize() {
        let (ctx, _dir) = context();
        let acct = account::add(&ctx, "Ravi", None, None).unwrap().client_id;
        let draft = create(
            &ctx,
            acct.as_str(),
            vec![LineItem::new("rice", 2, 150)],
            SaleOptions {
                draft: true,
                ..SaleOptions::default()
            },
        )
        .unwrap();
        assert_eq!(draft.status, TransactionStatus::Draft);
        assert_eq!(ctx.books().unwrap().account(&acct).unwrap().balance, 0);

        let done = finalize(&ctx, draft.client_id.as_str()).unwrap();
        assert_eq!(done.status, TransactionStatus::Pending);
        assert_eq!(ctx.books().unwrap().account(&acct).unwrap().balance, 300);
    }

    #[test]
    fn prepaid_purchase() {
        let (ctx, _dir) = context();
        let acct = account::add(&ctx, "Wholesaler", None, None).unwrap().client_id;
        let txn = create(
            &ctx,
            acct.as_str(),
            vec![LineItem::new("flour", 10, 40)],
            SaleOptions {
                kind: KindArg::Purchase,
                paid: 100,
                ..SaleOptions::default()
            },
        )
        .unwrap();
        assert_eq!(txn.kind, TransactionKind::Purchase);
        assert_eq!(txn.balance_due, 300);
        assert_eq!(txn.status, TransactionStatus::Partial);
    }
}
