//! Error types for cache operations

use std::time::Duration;

use thiserror::Error;

/// Main error type for all cache operations
///
/// `Clone` so that a single fill failure can be handed to every caller
/// waiting on the same in-flight key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// URL could not be parsed or normalized
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Input does not fit the requested category or operation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// External fetch / render / OCR failed
    #[error("fill failed: {0}")]
    FillFailed(String),

    /// External fill did not finish in time
    #[error("fill timed out after {0:?}")]
    FillTimedOut(Duration),

    /// Durable tier unreachable (or circuit open)
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Durable tier operation failed
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Compression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Decompression failed
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Activity record rejected by validation
    #[error("invalid activity record: {0}")]
    InvalidRecord(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Failure of the external fill (including timeout)
    pub fn is_fill_failure(&self) -> bool {
        matches!(self, CacheError::FillFailed(_) | CacheError::FillTimedOut(_))
    }

    /// Failure attributable to the durable tier
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_) | CacheError::Backend(_))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::FillFailed("render crashed".to_string());
        assert_eq!(err.to_string(), "fill failed: render crashed");

        let err = CacheError::StoreUnavailable("circuit open".to_string());
        assert_eq!(err.to_string(), "store unavailable: circuit open");

        let err = CacheError::FillTimedOut(Duration::from_secs(5));
        assert_eq!(err.to_string(), "fill timed out after 5s");
    }

    #[test]
    fn test_error_clone() {
        let err = CacheError::FillTimedOut(Duration::from_millis(10));
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }

    #[test]
    fn test_classification() {
        assert!(CacheError::FillFailed("x".into()).is_fill_failure());
        assert!(CacheError::FillTimedOut(Duration::ZERO).is_fill_failure());
        assert!(!CacheError::Backend("x".into()).is_fill_failure());

        assert!(CacheError::StoreUnavailable("x".into()).is_store_failure());
        assert!(CacheError::Backend("x".into()).is_store_failure());
        assert!(!CacheError::InvalidUrl("x".into()).is_store_failure());
    }
}
