//! Cluster error types

use thiserror::Error;

/// Cluster errors
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid routing: {0}")]
    InvalidRouting(String),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;
