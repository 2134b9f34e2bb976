//! Error types for the store crate.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path is empty or contains empty segments.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend/database error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for pulseox_core::Error {
    fn from(e: StoreError) -> Self {
        pulseox_core::Error::Storage(e.to_string())
    }
}
