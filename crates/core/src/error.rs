//! Error types for ThemisDB
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! ### Error Categories
//!
//! - **InvalidArgument / NotFound**: surface to the caller, never retried
//! - **TypeMismatch / DecodeError / DimensionMismatch**: coercion and codec
//!   failures, carry the offending field or dimensions
//! - **Conflict / Cancelled / Unavailable**: retriable by the caller
//! - **Corruption**: fatal, requires operator action
//! - **PolicyDenied**: rejection by the external policy oracle
//!
//! Internal components return `Result` values; the transaction manager is
//! the integration point that decides whether a failure runs saga
//! compensation.

use std::io;
use thiserror::Error;

/// Result type alias for Themis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ThemisDB
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input from the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing key or entity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Field coercion failure
    #[error("Type mismatch on field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field name that failed coercion
        field: String,
        /// Expected type name
        expected: &'static str,
        /// Actual type name found
        actual: &'static str,
    },

    /// Codec failure (unknown tag, truncated payload, nesting too deep)
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Vector length does not match the namespace dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the namespace
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// Snapshot write-write conflict detected at commit
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Operation issued against a committed or aborted transaction
    #[error("Transaction {0} is finished")]
    TxFinished(u64),

    /// Deadline expiry or explicit cancellation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Transient storage or index unavailability
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Detected data inconsistency
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Rejection by the external policy oracle
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    /// I/O error (file operations, checkpoint writes)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Check whether the caller may retry the failed operation.
    ///
    /// `Conflict` retries need a fresh transaction; `Cancelled` and
    /// `Unavailable` retries should back off first.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::Cancelled(_) | Error::Unavailable(_)
        )
    }

    /// Check whether this error is fatal and requires operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Shorthand for a `TypeMismatch` on a named field.
    pub fn type_mismatch(field: &str, expected: &'static str, actual: &'static str) -> Self {
        Error::TypeMismatch {
            field: field.to_string(),
            expected,
            actual,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_argument() {
        let err = Error::InvalidArgument("empty table name".to_string());
        assert!(err.to_string().contains("Invalid argument"));
        assert!(err.to_string().contains("empty table name"));
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let err = Error::type_mismatch("embedding", "vector<f32>", "string");
        let msg = err.to_string();
        assert!(msg.contains("embedding"));
        assert!(msg.contains("vector<f32>"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_error_display_dimension_mismatch() {
        let err = Error::DimensionMismatch {
            expected: 384,
            actual: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(Error::Conflict("w-w on acc-1".into()).is_retriable());
        assert!(Error::Cancelled("deadline".into()).is_retriable());
        assert!(Error::Unavailable("engine closed".into()).is_retriable());
        assert!(!Error::NotFound("relational:accounts:x".into()).is_retriable());
        assert!(!Error::Corruption("bad checksum".into()).is_retriable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Corruption("manifest CRC".into()).is_fatal());
        assert!(!Error::Conflict("x".into()).is_fatal());
        assert!(!Error::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn test_tx_finished_display() {
        let err = Error::TxFinished(42);
        assert_eq!(err.to_string(), "Transaction 42 is finished");
    }
}
