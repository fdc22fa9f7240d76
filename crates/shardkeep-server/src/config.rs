//! Node configuration - loaded from YAML

use serde::{Deserialize, Serialize};
use shardkeep_settings::Settings;
use shardkeep_store::{RateLimitMode, THROTTLE_MAX_BYTES_PER_SEC, THROTTLE_TYPE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity and data paths
    pub node: NodeSettings,
    /// Routing source
    pub cluster: ClusterSettings,
    /// Dynamic settings source
    pub settings: DynamicSettings,
    /// Store defaults applied at startup
    pub store: StoreSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Node identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Id this node appears under in the routing table
    pub id: String,
    /// Data paths; empty disables local shard data
    pub data_paths: Vec<PathBuf>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            id: "node-1".to_string(),
            data_paths: vec![PathBuf::from("./data")],
        }
    }
}

/// Routing source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// TOML routing table, re-read every poll
    pub routing_file: Option<PathBuf>,
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            routing_file: Some(PathBuf::from("routing.toml")),
            poll_interval_ms: 1000,
        }
    }
}

/// Dynamic settings source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicSettings {
    /// YAML settings layered over the startup settings, re-read every poll
    pub file: Option<PathBuf>,
}

/// Store defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub throttle: ThrottleSettings,
}

/// Startup throttle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// none, merge or all
    #[serde(rename = "type")]
    pub mode: RateLimitMode,
    /// Byte size per second ("20mb"); "0" means unlimited
    pub max_bytes_per_sec: String,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::None,
            max_bytes_per_sec: "0".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Include target in logs
    pub show_target: bool,
    /// Include thread IDs in logs
    pub show_thread_ids: bool,
    /// Include file and line numbers
    pub show_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_location: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: NodeConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Write default config to a file
    pub fn write_default(path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(&Self::default())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Startup settings handed to the store
    pub fn node_settings(&self) -> Settings {
        Settings::builder()
            .put(THROTTLE_TYPE, self.store.throttle.mode.to_string())
            .put(THROTTLE_MAX_BYTES_PER_SEC, self.store.throttle.max_bytes_per_sec.clone())
            .build()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.poll_interval_ms.max(10))
    }

    /// Get log level
    pub fn log_level(&self) -> Level {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}
