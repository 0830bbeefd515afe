//! # LedgerSync Sync Engine
//!
//! The device side of synchronization.
//!
//! This crate provides:
//! - The sync run state machine (idle → collecting → sending → applying)
//! - A reentrancy guard that coalesces overlapping run requests
//! - Retry with exponential backoff and a bounded attempt count
//! - Transport abstraction with an HTTP transport and an in-process loopback
//! - A store-backed applier that marks records synced and clears the outbox
//! - A connectivity monitor and an async auto-sync driver
//!
//! ## Run
//!
//! 1. Snapshot every unsynced record and the outbox watermark in one read.
//! 2. Push the snapshot as one batch; an empty snapshot is a no-op.
//! 3. Mark accepted records synced, unless they changed while in flight,
//!    and remove the outbox items the batch covered.
//!
//! A transport failure leaves local state untouched, so the identical batch
//! can be sent again. The reconciler's idempotence makes that safe even when
//! the first attempt actually landed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod auto;
mod config;
mod connectivity;
mod error;
mod http;
mod notify;
mod state;
mod transport;

pub use applier::{AppliedOutcome, PendingSummary, Snapshot, StoreApplier, SyncApplier};
pub use auto::{AutoSync, SyncEvent, SyncTrigger};
pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpFailure, HttpTransport, LoopbackClient, LoopbackServer, BALANCE_ENDPOINT,
    SYNC_ENDPOINT,
};
pub use notify::{LogNotifier, NotificationRequest, Notifier, NoopNotifier};
pub use state::{SyncEngine, SyncReport, SyncState, SyncStats, SyncStatus};
pub use transport::{MockTransport, SyncTransport};
