//! Error types for the sync server.
//!
//! These fail a whole request. Problems with individual records are
//! reported inside the response instead.

use ledgersync_core::CoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request body is not a batch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request carries more records than allowed.
    #[error("batch too large: {records} records exceeds limit of {max}")]
    BatchTooLarge {
        /// Records in the request.
        records: usize,
        /// Configured limit.
        max: usize,
    },

    /// Unknown route or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server's store failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::BatchTooLarge { .. }
                | ServerError::NotFound(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Store(_) | ServerError::Internal(_))
    }

    /// HTTP status an adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotFound(_) => 404,
            ServerError::BatchTooLarge { .. } => 413,
            ServerError::Store(_) | ServerError::Internal(_) => 500,
        }
    }
}

impl From<ledgersync_protocol::ProtocolError> for ServerError {
    fn from(err: ledgersync_protocol::ProtocolError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::BatchTooLarge { records: 9, max: 1 }.is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn status_codes() {
        assert_eq!(ServerError::InvalidRequest("bad".into()).status_code(), 400);
        assert_eq!(ServerError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ServerError::BatchTooLarge { records: 2, max: 1 }.status_code(), 413);
        assert_eq!(ServerError::Internal("oops".into()).status_code(), 500);
    }

    #[test]
    fn error_display() {
        let msg = ServerError::BatchTooLarge {
            records: 1500,
            max: 1000,
        }
        .to_string();
        assert!(msg.contains("1500"));
        assert!(msg.contains("1000"));
    }
}
