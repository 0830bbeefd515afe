//! Temporary stores and common bookkeeping scenarios.

use ledgersync_core::{Books, EntityStore, StoreConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<EntityStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(EntityStore::open_in_memory().expect("Failed to open in-memory store")),
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = EntityStore::open(&temp_dir.path().join("books"), StoreConfig::default())
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Store directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("books"))
    }

    /// Bookkeeping operations over this store.
    pub fn books(&self) -> Books {
        Books::new(Arc::clone(&self.store))
    }

    /// Closes and reopens a file-backed store, replaying its journal.
    ///
    /// Panics for in-memory stores or if another handle keeps the store open.
    pub fn reopen(self) -> Self {
        let TestStore { store, _temp_dir } = self;
        let temp_dir = _temp_dir.expect("Only file stores can be reopened");
        drop(store);
        let store = EntityStore::open(&temp_dir.path().join("books"), StoreConfig::default())
            .expect("Failed to reopen store");
        Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = EntityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test against books over a temporary in-memory store.
pub fn with_temp_books<F, R>(f: F) -> R
where
    F: FnOnce(&Books) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.books())
}

/// Runs a test against books over a temporary file-backed store.
pub fn with_file_books<F, R>(f: F) -> R
where
    F: FnOnce(&Books, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.books(), &path)
}

/// Bookkeeping scenario helpers.
pub mod scenarios {
    use crate::generators::BookOp;
    use ledgersync_core::{Adjustment, Books, NewAccount, NewPayment, NewTransaction};
    use ledgersync_protocol::{Account, ClientId, LineItem};

    /// Creates an account.
    pub fn account(books: &Books, name: &str) -> Account {
        books
            .create_account(NewAccount::new(name))
            .expect("Failed to create account")
    }

    /// Creates an account and one final single-item sale of `total`.
    pub fn sale(books: &Books, name: &str, total: u64) -> (ClientId, ClientId) {
        let account = account(books, name).client_id;
        let txn = books
            .create_transaction(NewTransaction::new(
                account.clone(),
                vec![LineItem::new("item", 1, total)],
            ))
            .expect("Failed to create transaction")
            .client_id;
        (account, txn)
    }

    /// A sale followed by a payment against it.
    pub fn sale_with_payment(books: &Books, name: &str, total: u64, paid: u64) -> (ClientId, ClientId) {
        let (account, txn) = sale(books, name, total);
        books
            .record_payment(NewPayment::new(account.clone(), paid).against(txn.clone()))
            .expect("Failed to record payment");
        (account, txn)
    }

    /// Creates `count` accounts, each with one sale of `100 * (i + 1)`.
    pub fn shop(books: &Books, count: usize) -> Vec<ClientId> {
        (0..count)
            .map(|i| sale(books, &format!("account_{i}"), 100 * (i as u64 + 1)).0)
            .collect()
    }

    /// Applies generated operations to one account.
    pub fn apply_ops(books: &Books, account: &ClientId, ops: &[BookOp]) {
        for op in ops {
            match *op {
                BookOp::Sale { amount } => {
                    books
                        .create_transaction(NewTransaction::new(
                            account.clone(),
                            vec![LineItem::new("item", 1, amount)],
                        ))
                        .expect("Failed to create transaction");
                }
                BookOp::Payment { amount } => {
                    books
                        .record_payment(NewPayment::new(account.clone(), amount))
                        .expect("Failed to record payment");
                }
                BookOp::Adjust { direction, amount } => {
                    books
                        .adjust(Adjustment::new(account.clone(), direction, amount))
                        .expect("Failed to adjust");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::Account;

    #[test]
    fn memory_store_has_no_path() {
        let test_store = TestStore::memory();
        assert!(test_store.path().is_none());
        assert!(test_store.all::<Account>().is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let test_store = TestStore::file();
        let (account, _) = scenarios::sale(&test_store.books(), "Ravi", 700);

        let test_store = test_store.reopen();
        assert_eq!(test_store.books().account(&account).unwrap().balance, 700);
    }

    #[test]
    fn shop_scenario() {
        with_temp_books(|books| {
            let accounts = scenarios::shop(books, 3);
            assert_eq!(accounts.len(), 3);
            assert_eq!(books.top_debtors(1)[0].client_id, accounts[2]);
        });
    }

    #[test]
    fn payment_scenario_settles() {
        with_file_books(|books, path| {
            assert!(path.exists());
            let (account, txn) = scenarios::sale_with_payment(books, "Meena", 500, 200);
            assert_eq!(books.account(&account).unwrap().balance, 300);
            assert_eq!(books.transaction(&txn).unwrap().balance_due, 300);
        });
    }
}
