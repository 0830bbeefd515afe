//! # LedgerSync Protocol
//!
//! Shared vocabulary of the device and the remote reconciler.
//!
//! This crate provides:
//! - [`ClientId`] and [`EntityClass`]
//! - the four synced records: [`Account`], [`Transaction`], [`Payment`],
//!   [`LedgerEntry`], each validated at the boundary
//! - batch messages ([`SyncBatch`], [`BatchResponse`]) and the
//!   [`BalanceReport`] audit answer, encoded as JSON
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod messages;
mod records;

pub use error::{ProtocolError, ProtocolResult, ValidationError};
pub use ids::{ClientId, EntityClass};
pub use messages::{
    BalanceReport, BatchResponse, DecodedBatch, RecordError, RecordErrorKind, SyncBatch,
    SyncedCounts,
};
pub use records::{
    Account, AccountStatus, Direction, Entity, EntrySource, LedgerEntry, LineItem, Payment,
    PaymentMethod, Transaction, TransactionKind, TransactionStatus, MAX_AMOUNT,
};
