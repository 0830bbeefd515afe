//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Each of these fails a whole run. Records the reconciler rejects are not
/// errors; they come back in the batch response and simply stay unsynced.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A body could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server failed while handling the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// The server refused the request as a whole.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Local store error during collection or apply.
    #[error("store error: {0}")]
    Store(#[from] ledgersync_core::CoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::ServerError(_) | SyncError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<ledgersync_protocol::ProtocolError> for SyncError {
    fn from(err: ledgersync_protocol::ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
