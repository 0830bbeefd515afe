//! # LedgerSync Testkit
//!
//! Test utilities for LedgerSync.
//!
//! This crate provides:
//! - Temporary stores (in-memory and file-backed)
//! - Scenario helpers that drive [`Books`](ledgersync_core::Books)
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgersync_testkit::prelude::*;
//!
//! #[test]
//! fn sale_shows_up_in_the_ledger() {
//!     with_temp_books(|books| {
//!         let (account, _) = scenarios::sale(books, "Ravi", 1000);
//!         assert_eq!(books.account_ledger(&account).len(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
