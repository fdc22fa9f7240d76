//! Error types for shardkeep-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid byte size value: {0}")]
    InvalidByteSize(String),

    #[error("Byte size value out of range: {0}")]
    ByteSizeOverflow(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
