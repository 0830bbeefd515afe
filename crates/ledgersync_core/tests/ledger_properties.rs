//! Property tests: cached balances always agree with the ledger.

use ledgersync_core::{Adjustment, Books, EntityStore, NewAccount, NewPayment, NewTransaction};
use ledgersync_protocol::{Direction, LineItem, TransactionStatus};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Sale { price: u64, prepaid: u64 },
    Draft { price: u64 },
    Pay { amount: u64, against_last: bool },
    Adjust { amount: u64, credit: bool },
    FinalizeDrafts,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..10_000, 0u64..5_000).prop_map(|(price, prepaid)| Op::Sale { price, prepaid }),
        (1u64..10_000).prop_map(|price| Op::Draft { price }),
        (1u64..8_000, any::<bool>()).prop_map(|(amount, against_last)| Op::Pay { amount, against_last }),
        (1u64..3_000, any::<bool>()).prop_map(|(amount, credit)| Op::Adjust { amount, credit }),
        Just(Op::FinalizeDrafts),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn cached_balance_matches_recomputation(ops in proptest::collection::vec(op(), 1..25)) {
        let books = Books::new(Arc::new(EntityStore::open_in_memory().unwrap()));
        let account = books
            .create_account(NewAccount::new("Ravi"))
            .unwrap()
            .client_id;
        let mut last_final = None;
        let mut drafts = Vec::new();

        for op in ops {
            match op {
                Op::Sale { price, prepaid } => {
                    let t = books
                        .create_transaction(
                            NewTransaction::new(account.clone(), vec![LineItem::new("x", 1, price)])
                                .amount_paid(prepaid),
                        )
                        .unwrap();
                    prop_assert_eq!(t.balance_due, price.saturating_sub(prepaid));
                    last_final = Some(t.client_id);
                }
                Op::Draft { price } => {
                    let t = books
                        .create_transaction(
                            NewTransaction::new(account.clone(), vec![LineItem::new("x", 1, price)]).draft(),
                        )
                        .unwrap();
                    drafts.push(t.client_id);
                }
                Op::Pay { amount, against_last } => {
                    let mut payment = NewPayment::new(account.clone(), amount);
                    if against_last {
                        if let Some(t) = &last_final {
                            payment = payment.against(t.clone());
                        }
                    }
                    books.record_payment(payment).unwrap();
                }
                Op::Adjust { amount, credit } => {
                    books
                        .adjust(Adjustment {
                            account_id: account.clone(),
                            direction: if credit { Direction::Credit } else { Direction::Debit },
                            amount,
                            description: None,
                        })
                        .unwrap();
                }
                Op::FinalizeDrafts => {
                    for id in drafts.drain(..) {
                        books.finalize_transaction(&id).unwrap();
                        last_final = Some(id);
                    }
                }
            }

            let cached = books.account(&account).unwrap().balance;
            let report = books.balance_report(&account).unwrap();
            prop_assert_eq!(cached, report.balance);
        }

        prop_assert!(books.audit_all().is_empty());
        for t in books.transactions_for(&account) {
            prop_assert_eq!(t.balance_due, t.total.saturating_sub(t.amount_paid));
            if t.status != TransactionStatus::Draft {
                prop_assert_eq!(t.status == TransactionStatus::Paid, t.balance_due == 0);
            }
        }
        prop_assert_eq!(books.recalculate(&account).unwrap(), books.account(&account).unwrap().balance);
    }
}
