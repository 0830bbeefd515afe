//! # LedgerSync Storage
//!
//! Byte-level storage for the LedgerSync journal.
//!
//! A backend is an **opaque append-only byte store**. It knows nothing about
//! accounts, ledger entries or journal framing; `ledgersync_core` owns all
//! interpretation of the bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway stores
//! - [`FileBackend`] - the on-device journal file
//!
//! ## Example
//!
//! ```rust
//! use ledgersync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
