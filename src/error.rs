//! Error types for rate limiting and state storage.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No live record exists for the key (absent or expired).
    #[error("key not found: {0}")]
    NotFound(String),

    /// The request was rejected before touching the backend.
    #[error("invalid store input: {0}")]
    InvalidInput(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record decoded fine but does not hold the expected state.
    #[error("corrupt state for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The backend did not answer in time.
    #[error("store {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Any other backend failure (connectivity, driver errors).
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error only signals an absent record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Main error type for rate limiting operations.
#[derive(Error, Debug)]
pub enum RateKeepError {
    /// Caller input rejected before any store interaction
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reset was asked for a key with no state record
    #[error("No rate limit state for key: {0}")]
    NotFound(String),

    /// Underlying store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateKeepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_into_store_variant() {
        let err: RateKeepError = StoreError::Backend("connection refused".to_string()).into();
        assert!(matches!(err, RateKeepError::Store(StoreError::Backend(_))));
        assert_eq!(
            err.to_string(),
            "Store error: store backend error: connection refused"
        );
    }

    #[test]
    fn test_timeout_is_not_not_found() {
        let err = StoreError::Timeout {
            operation: "get",
            timeout: Duration::from_secs(2),
        };
        assert!(!err.is_not_found());
        assert!(StoreError::NotFound("k".to_string()).is_not_found());
    }
}
