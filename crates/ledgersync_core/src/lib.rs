//! # LedgerSync Core
//!
//! The device-side heart of LedgerSync: a durable entity store, the ledger
//! engine that derives balances, and the outbox that remembers what the
//! remote has not yet acknowledged.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Books                    │  business operations
//! ├──────────────────────────────────────────┤
//! │  ledger (pure)  │  EntityStore + Outbox  │
//! ├──────────────────────────────────────────┤
//! │       Journal (framed CBOR commits)      │
//! ├──────────────────────────────────────────┤
//! │      StorageBackend (file / memory)      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - A business operation's entities, ledger entries and outbox items commit
//!   in one journal frame or not at all
//! - Ledger entries and payments are write-once
//! - An account's cached balance equals the signed sum of its entries, and
//!   [`Books::recalculate`] restores that when it does not

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod books;
mod config;
mod dir;
mod error;
pub mod journal;
pub mod ledger;
pub mod migration;
pub mod outbox;
mod store;
mod tables;

pub use books::{post_entry, AccountPatch, Adjustment, Books, NewAccount, NewPayment, NewTransaction};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use ledger::{Drift, Tally};
pub use migration::{Migration, MigrationContext, MigrationManager, MigrationRunResult};
pub use outbox::{OutboxAction, OutboxId, OutboxItem};
pub use store::{EntityStore, ReadView, WriteTxn};
pub use tables::{Record, Stored, Table};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
