//! Error types for answer store operations

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing answers
#[derive(Error, Debug)]
pub enum StoreError {
    /// No answer set exists for the requested assessment id
    #[error("Assessment not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Command rejected by the backend
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
