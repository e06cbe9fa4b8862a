//! Error types for cache operations
//!
//! Only [`CacheError::LockAcquisition`] ever escapes a public cache operation.
//! The remaining variants are produced internally, logged, and folded into
//! `false` / `None` results by the cache manager.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Lock not obtained within the retry budget
    #[error("Failed to acquire lock '{key}' after {attempts} attempts")]
    LockAcquisition { key: String, attempts: u32 },

    /// Backing store network or command failure
    #[error("Backing store error: {0}")]
    Store(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored checksum does not match the payload
    #[error("Integrity check failed for key '{key}'")]
    Integrity { key: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// The manager has been shut down
    #[error("Cache manager is shutting down")]
    ShuttingDown,

    /// Generic error with context
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Whether this error must be surfaced to the caller
    pub fn is_lock_error(&self) -> bool {
        matches!(self, CacheError::LockAcquisition { .. })
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Internal(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Internal(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
