//! Settings error types

use thiserror::Error;

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Invalid value [{value}] for setting [{key}]: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for settings operations
pub type Result<T> = std::result::Result<T, SettingsError>;

impl From<serde_yaml::Error> for SettingsError {
    fn from(e: serde_yaml::Error) -> Self {
        SettingsError::Parse(e.to_string())
    }
}
