//! Error types for records and messages.

use thiserror::Error;

/// Result type for message encoding and decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A record failed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("{field} is required")]
    MissingField {
        /// Field name as it appears on the wire.
        field: &'static str,
    },

    /// A quantity or amount that must be strictly positive is zero.
    #[error("{field} must be positive")]
    NotPositive {
        /// Field name as it appears on the wire.
        field: &'static str,
    },

    /// A value is outside the accepted range.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// The offending value.
        value: u64,
    },

    /// Fields disagree with each other.
    #[error("inconsistent record: {0}")]
    Inconsistent(String),

    /// The record could not be decoded at all.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Errors encoding or decoding a whole message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The message is structurally wrong.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
