//! # LedgerSync Sync Server
//!
//! The remote reconciler. It receives batches of device records, applies
//! one conflict policy per entity class and reports per-record outcomes.
//!
//! | Class | Policy |
//! |---|---|
//! | account, transaction | upsert-overwrite: the device copy replaces the stored one |
//! | ledger entry, payment | append-dedupe: the first copy wins, replays are no-ops |
//!
//! The reconciler persists into the same [`EntityStore`] the devices use,
//! so a server is just another store with a different write path. Account
//! balances on the server move only through accepted ledger entries.
//!
//! [`EntityStore`]: ledgersync_core::EntityStore

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod reconciler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use reconciler::{Reconciler, ReconcilerStats};
pub use server::{SyncServer, BALANCE_PATH_PREFIX, SYNC_PATH};
