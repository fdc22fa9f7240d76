//! shardkeep settings - Dynamic node settings
//!
//! This crate provides:
//! - `Settings`: flat map of dotted keys to string values, loadable from YAML
//! - `NodeSettingsService`: delivers every settings refresh to registered
//!   listeners and reports listener failures back to the caller

pub mod error;
pub mod service;
pub mod settings;

pub use error::{Result, SettingsError};
pub use service::{NodeSettingsService, SettingsListener};
pub use settings::{Settings, SettingsBuilder};
