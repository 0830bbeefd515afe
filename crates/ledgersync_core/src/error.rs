//! Error types for the entity store and books.

use crate::tables::Table;
use ledgersync_protocol::{ClientId, EntityClass, ValidationError};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store and ledger operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ledgersync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record failed boundary validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Journal is corrupted or invalid.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is missing or malformed.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A write targeted a table no migration has created.
    #[error("table {table} does not exist (schema not migrated)")]
    TableMissing {
        /// The missing table.
        table: Table,
    },

    /// An attempt to change a write-once record.
    #[error("{class} {client_id} is append-only and cannot be modified")]
    AppendOnlyViolation {
        /// Class of the record.
        class: EntityClass,
        /// Identity of the record.
        client_id: ClientId,
    },

    /// A record was looked up and is absent.
    #[error("{class} {client_id} not found")]
    NotFound {
        /// Class searched.
        class: EntityClass,
        /// Identity searched.
        client_id: ClientId,
    },

    /// A record refers to something that does not exist.
    #[error("{class} {client_id} references unknown {missing_class} {missing}")]
    UnknownReference {
        /// Class of the referring record.
        class: EntityClass,
        /// Identity of the referring record.
        client_id: ClientId,
        /// Class of the missing target.
        missing_class: EntityClass,
        /// Identity of the missing target.
        missing: ClientId,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },

    /// Migration failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(class: EntityClass, client_id: &ClientId) -> Self {
        Self::NotFound {
            class,
            client_id: client_id.clone(),
        }
    }

    /// Creates an unknown-reference error.
    pub fn unknown_reference(
        class: EntityClass,
        client_id: &ClientId,
        missing_class: EntityClass,
        missing: &ClientId,
    ) -> Self {
        Self::UnknownReference {
            class,
            client_id: client_id.clone(),
            missing_class,
            missing: missing.clone(),
        }
    }
}
