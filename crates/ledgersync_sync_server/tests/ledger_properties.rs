//! Generated device histories converge on the server.

use ledgersync_core::{Books, Stored};
use ledgersync_protocol::{Account, LedgerEntry, Payment, SyncBatch, Transaction};
use ledgersync_sync_server::{ServerConfig, SyncServer};
use ledgersync_testkit::prelude::*;
use proptest::prelude::*;

fn pending_batch(books: &Books) -> SyncBatch {
    fn unsynced<T: Stored>(books: &Books) -> Vec<T> {
        books.store().query(|r: &T| !r.is_synced())
    }
    SyncBatch {
        accounts: unsynced::<Account>(books),
        transactions: unsynced::<Transaction>(books),
        ledger: unsynced::<LedgerEntry>(books),
        payments: unsynced::<Payment>(books),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn server_balance_matches_device(ops in book_ops_strategy(10)) {
        let device = TestStore::memory();
        let books = device.books();
        let account = scenarios::account(&books, "Ravi").client_id;
        scenarios::apply_ops(&books, &account, &ops);

        let server = SyncServer::in_memory(ServerConfig::default()).unwrap();
        let batch = pending_batch(&books);
        let response = server.handle_batch(batch.clone()).unwrap();
        prop_assert!(response.is_clean());

        let expected: i64 = ops.iter().map(BookOp::effect).sum();
        let report = server.balance_report(&account).unwrap();
        prop_assert_eq!(report.balance, expected);
        prop_assert_eq!(report.entry_count, books.account_ledger(&account).len() as u64);
        prop_assert!(server.audit_all().is_empty());

        // a resend changes nothing
        server.handle_batch(batch).unwrap();
        prop_assert_eq!(server.balance_report(&account).unwrap(), report);
    }
}

#[test]
fn durable_server_store_reopens() {
    let device = TestStore::memory();
    let books = device.books();
    let accounts = scenarios::shop(&books, 4);

    let remote = TestStore::file();
    let path = remote.path().unwrap();
    drop(remote.store);

    {
        let server = SyncServer::open(&path, ServerConfig::default()).unwrap();
        assert!(server.handle_batch(pending_batch(&books)).unwrap().is_clean());
    }
    let server = SyncServer::open(&path, ServerConfig::default()).unwrap();
    for (i, account) in accounts.iter().enumerate() {
        let report = server.balance_report(account).unwrap();
        assert_eq!(report.balance, 100 * (i as i64 + 1));
    }
}
