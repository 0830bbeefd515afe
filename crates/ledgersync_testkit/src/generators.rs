//! Property-based test generators using proptest.
//!
//! Amounts stay small enough that long operation sequences never come near
//! the protocol's amount ceiling.

use ledgersync_protocol::{Account, ClientId, Direction, EntrySource, LedgerEntry, LineItem};
use proptest::prelude::*;

/// Strategy for generating client ids.
pub fn client_id_strategy() -> impl Strategy<Value = ClientId> {
    prop::string::string_regex("[a-z][a-z0-9-]{3,15}")
        .expect("Invalid regex")
        .prop_map(ClientId::from)
}

/// Strategy for positive money amounts in minor units.
pub fn amount_strategy() -> impl Strategy<Value = u64> {
    1u64..=1_000_000
}

/// Strategy for ledger directions.
pub fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Credit), Just(Direction::Debit)]
}

/// Strategy for a single line item.
pub fn line_item_strategy() -> impl Strategy<Value = LineItem> {
    (
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        1u32..=20,
        1u64..=50_000,
    )
        .prop_map(|(name, quantity, price)| LineItem::new(name, quantity, price))
}

/// Strategy for a non-empty list of line items.
pub fn line_items_strategy() -> impl Strategy<Value = Vec<LineItem>> {
    prop::collection::vec(line_item_strategy(), 1..6)
}

/// Strategy for unsynced account records.
pub fn account_strategy() -> impl Strategy<Value = Account> {
    (
        client_id_strategy(),
        prop::string::string_regex("[A-Z][a-z]{2,15}").expect("Invalid regex"),
    )
        .prop_map(|(id, name)| Account::new(id, name))
}

/// Strategy for manual ledger entries against `account`.
pub fn ledger_entry_strategy(account: ClientId) -> impl Strategy<Value = LedgerEntry> {
    (client_id_strategy(), direction_strategy(), amount_strategy()).prop_map(
        move |(id, direction, amount)| {
            LedgerEntry::new(id, account.clone(), direction, amount, EntrySource::Manual)
                .expect("Generated amount is valid")
        },
    )
}

/// One bookkeeping operation against a single account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookOp {
    /// A final sale.
    Sale {
        /// Sale total.
        amount: u64,
    },
    /// A payment not tied to a transaction.
    Payment {
        /// Amount paid.
        amount: u64,
    },
    /// A manual correction.
    Adjust {
        /// Entry direction.
        direction: Direction,
        /// Entry amount.
        amount: u64,
    },
}

impl BookOp {
    /// Signed effect on the account balance.
    pub fn effect(&self) -> i64 {
        match *self {
            BookOp::Sale { amount } => amount as i64,
            BookOp::Payment { amount } => -(amount as i64),
            BookOp::Adjust { direction, amount } => direction.sign() * amount as i64,
        }
    }
}

/// Strategy for a single bookkeeping operation.
pub fn book_op_strategy() -> impl Strategy<Value = BookOp> {
    prop_oneof![
        3 => amount_strategy().prop_map(|amount| BookOp::Sale { amount }),
        2 => amount_strategy().prop_map(|amount| BookOp::Payment { amount }),
        1 => (direction_strategy(), amount_strategy())
            .prop_map(|(direction, amount)| BookOp::Adjust { direction, amount }),
    ]
}

/// Strategy for a sequence of bookkeeping operations.
pub fn book_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<BookOp>> {
    prop::collection::vec(book_op_strategy(), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{scenarios, with_temp_books};
    use ledgersync_protocol::Entity;

    proptest! {
        #[test]
        fn generated_records_validate(
            account in account_strategy(),
            items in line_items_strategy(),
        ) {
            prop_assert!(account.validate().is_ok());
            prop_assert!(!items.is_empty());
        }

        #[test]
        fn cached_balance_matches_operations(ops in book_ops_strategy(12)) {
            with_temp_books(|books| {
                let account = scenarios::account(books, "Ravi").client_id;
                scenarios::apply_ops(books, &account, &ops);
                let expected: i64 = ops.iter().map(BookOp::effect).sum();
                prop_assert_eq!(books.account(&account).unwrap().balance, expected);
                prop_assert!(books.audit_all().is_empty());
                Ok(())
            })?;
        }
    }
}
