//! Store error types

use shardkeep_core::ShardId;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shard {0} is allocated on this node, can't be deleted")]
    ShardAllocated(ShardId),

    #[error("Invalid index name for a data path: {0}")]
    InvalidIndexName(String),

    #[error("Invalid store throttle type: {0}")]
    InvalidRateLimitMode(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Settings error: {0}")]
    Settings(#[from] shardkeep_settings::SettingsError),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
