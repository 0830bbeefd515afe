//! File-backed store durability and recovery.

use ledgersync_core::{
    Books, CoreError, EntityStore, NewAccount, NewPayment, NewTransaction, StoreConfig,
};
use ledgersync_protocol::{Account, LedgerEntry, LineItem, Transaction, TransactionStatus};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;

fn open(path: &std::path::Path) -> Books {
    let store = EntityStore::open(path, StoreConfig::default().sync_on_commit(false)).unwrap();
    Books::new(Arc::new(store))
}

#[test]
fn committed_state_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let books = open(dir.path());
        books
            .create_account(NewAccount::new("Ravi").with_client_id("A1".into()))
            .unwrap();
        books
            .create_transaction(
                NewTransaction::new("A1".into(), vec![LineItem::new("rice", 2, 500)])
                    .with_client_id("T1".into()),
            )
            .unwrap();
        books
            .record_payment(NewPayment::new("A1".into(), 400).against("T1".into()))
            .unwrap();
    }

    let books = open(dir.path());
    let store = books.store();
    assert_eq!(store.schema_version(), 2);
    assert_eq!(store.get::<Account>(&"A1".into()).unwrap().balance, 600);
    let t1 = store.get::<Transaction>(&"T1".into()).unwrap();
    assert_eq!(t1.status, TransactionStatus::Partial);
    assert_eq!(store.all::<LedgerEntry>().len(), 2);
    assert_eq!(store.outbox_pending().len(), 6);
    assert!(books.audit_all().is_empty());
}

#[test]
fn reopen_does_not_rerun_migrations() {
    let dir = tempdir().unwrap();
    let sequence = {
        let books = open(dir.path());
        books.store().sequence()
    };
    let books = open(dir.path());
    assert_eq!(books.store().sequence(), sequence);
}

#[test]
fn torn_tail_is_discarded_on_open() {
    let dir = tempdir().unwrap();
    let size = {
        let books = open(dir.path());
        books
            .create_account(NewAccount::new("Ravi").with_client_id("A1".into()))
            .unwrap();
        books.store().journal_size().unwrap()
    };

    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("journal.log"))
            .unwrap();
        file.write_all(b"LSJ1\x01\x00\xff\xff\x00\x00partial").unwrap();
    }

    let books = open(dir.path());
    assert_eq!(books.store().journal_size().unwrap(), size);
    assert!(books.account(&"A1".into()).is_some());

    books
        .create_account(NewAccount::new("Meena").with_client_id("A2".into()))
        .unwrap();
    drop(books);
    let books = open(dir.path());
    assert_eq!(books.accounts().len(), 2);
}

#[test]
fn damaged_commit_before_later_commits_fails_open() {
    let dir = tempdir().unwrap();
    let journal = dir.path().join("journal.log");
    let damaged_at = {
        let books = open(dir.path());
        books
            .create_account(NewAccount::new("Ravi").with_client_id("A1".into()))
            .unwrap();
        // last payload byte of the A1 commit
        let at = books.store().journal_size().unwrap() - 5;
        books
            .create_account(NewAccount::new("Meena").with_client_id("A2".into()))
            .unwrap();
        at
    };

    let mut bytes = std::fs::read(&journal).unwrap();
    let len = bytes.len();
    bytes[damaged_at as usize] ^= 0xFF;
    std::fs::write(&journal, &bytes).unwrap();

    let err = EntityStore::open(dir.path(), StoreConfig::default()).err().unwrap();
    assert!(matches!(err, CoreError::JournalCorruption { .. }));
    // nothing was cut away
    assert_eq!(std::fs::metadata(&journal).unwrap().len(), len as u64);
}

#[test]
fn second_process_is_locked_out() {
    let dir = tempdir().unwrap();
    let _books = open(dir.path());
    let second = EntityStore::open(dir.path(), StoreConfig::default());
    assert!(matches!(second, Err(CoreError::StoreLocked)));
}

#[test]
fn missing_directory_without_create() {
    let dir = tempdir().unwrap();
    let result = EntityStore::open(
        &dir.path().join("nope"),
        StoreConfig::default().create_if_missing(false),
    );
    assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
}
