//! Static routing description
//!
//! Describes a routing table in TOML so a node can be driven from a file.
//! The coordinator that normally computes routing is out of this crate's
//! reach; this format is what it would hand over.

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use shardkeep_core::{
    state_not_recovered_block, ClusterBlocks, ClusterState, IndexRoutingTable,
    IndexShardRoutingTable, RoutingTable, ShardId, ShardRouting, ShardRoutingState,
};
use std::collections::HashSet;
use std::path::Path;

/// Routing table description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Routing table version
    #[serde(default)]
    pub version: u64,
    /// Mark the cluster view as not yet recovered
    #[serde(default)]
    pub disable_state_persistence: bool,
    /// Indices and their shard groups
    #[serde(default)]
    pub indices: Vec<IndexConfig>,
}

/// One index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index name
    pub name: String,
    /// Shard groups
    #[serde(default)]
    pub shards: Vec<ShardGroupConfig>,
}

/// One replication group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardGroupConfig {
    /// Shard ordinal
    pub id: u32,
    /// Copies of the shard
    #[serde(default)]
    pub copies: Vec<CopyConfig>,
}

/// One shard copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Node holding the copy
    #[serde(default)]
    pub node: Option<String>,
    /// Relocation target
    #[serde(default)]
    pub relocating_node: Option<String>,
    /// Primary flag
    #[serde(default)]
    pub primary: bool,
    /// Lifecycle state
    #[serde(default = "default_copy_state")]
    pub state: ShardRoutingState,
}

fn default_copy_state() -> ShardRoutingState {
    ShardRoutingState::Started
}

impl RoutingConfig {
    /// Load a routing description from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClusterError::Configuration(format!("Failed to read routing file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse a routing description from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ClusterError::Configuration(format!("Failed to parse routing: {}", e)))
    }

    /// Validate the description
    pub fn validate(&self) -> Result<()> {
        let mut index_names = HashSet::new();

        for index in &self.indices {
            if index.name.trim().is_empty() {
                return Err(ClusterError::InvalidRouting("Empty index name".to_string()));
            }
            if !index_names.insert(index.name.as_str()) {
                return Err(ClusterError::InvalidRouting(format!(
                    "Index '{}' listed more than once",
                    index.name
                )));
            }

            let mut ordinals = HashSet::new();
            for group in &index.shards {
                if !ordinals.insert(group.id) {
                    return Err(ClusterError::InvalidRouting(format!(
                        "Shard [{}][{}] listed more than once",
                        index.name, group.id
                    )));
                }
                for copy in &group.copies {
                    validate_copy(&index.name, group.id, copy)?;
                }
            }
        }

        Ok(())
    }

    /// Build the routing table
    pub fn to_routing_table(&self) -> Result<RoutingTable> {
        self.validate()?;

        let mut table = RoutingTable::new(self.version);
        for index in &self.indices {
            let mut index_table = IndexRoutingTable::new(index.name.clone());
            for group in &index.shards {
                let shard_id = ShardId::new(index.name.clone(), group.id);
                let mut shard_table = IndexShardRoutingTable::new(shard_id.clone());
                for copy in &group.copies {
                    shard_table = shard_table.with_copy(ShardRouting {
                        shard_id: shard_id.clone(),
                        current_node_id: copy.node.clone(),
                        relocating_node_id: copy.relocating_node.clone(),
                        primary: copy.primary,
                        state: copy.state,
                    });
                }
                index_table = index_table.with_shard(shard_table);
            }
            table = table.with_index(index_table);
        }

        Ok(table)
    }

    /// Build a cluster snapshot as seen by `local_node_id`
    pub fn to_cluster_state(&self, local_node_id: &str, state_version: u64) -> Result<ClusterState> {
        let routing_table = self.to_routing_table()?;
        let blocks = if self.disable_state_persistence {
            ClusterBlocks::empty().with_block(state_not_recovered_block())
        } else {
            ClusterBlocks::empty()
        };
        Ok(ClusterState::new(state_version, local_node_id, routing_table, blocks))
    }
}

fn validate_copy(index: &str, shard: u32, copy: &CopyConfig) -> Result<()> {
    let invalid = |msg: &str| -> Result<()> {
        Err(ClusterError::InvalidRouting(format!(
            "Shard [{}][{}]: {}",
            index, shard, msg
        )))
    };

    match copy.state {
        ShardRoutingState::Unassigned => {
            if copy.node.is_some() || copy.relocating_node.is_some() {
                return invalid("unassigned copy cannot name a node");
            }
        }
        ShardRoutingState::Initializing | ShardRoutingState::Started => {
            if copy.node.is_none() {
                return invalid("assigned copy requires a node");
            }
        }
        ShardRoutingState::Relocating => {
            if copy.node.is_none() || copy.relocating_node.is_none() {
                return invalid("relocating copy requires node and relocating_node");
            }
        }
        ShardRoutingState::Failed => {}
    }

    if copy.state == ShardRoutingState::Started && copy.relocating_node.is_some() {
        return invalid("started copy cannot have a relocating_node");
    }

    if copy.node.is_some() && copy.node == copy.relocating_node {
        return invalid("copy cannot relocate to its own node");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTING: &str = r#"
        version = 7

        [[indices]]
        name = "logs"

        [[indices.shards]]
        id = 0

        [[indices.shards.copies]]
        node = "node1"
        primary = true

        [[indices.shards.copies]]
        node = "node2"
        relocating_node = "node3"
        state = "relocating"

        [[indices.shards]]
        id = 1

        [[indices.shards.copies]]
        state = "unassigned"
        primary = true

        [[indices]]
        name = "metrics"
    "#;

    #[test]
    fn test_parse_toml() {
        let config = RoutingConfig::from_toml(ROUTING).unwrap();
        assert_eq!(config.version, 7);
        assert_eq!(config.indices.len(), 2);
        assert!(config.validate().is_ok());

        let table = config.to_routing_table().unwrap();
        assert_eq!(table.version, 7);
        assert_eq!(table.shard_group_count(), 2);

        let group = table.index("logs").unwrap().shard(0).unwrap();
        assert_eq!(group.size(), 2);
        assert!(group.copies[0].started());
        assert!(group.copies[0].primary);
        assert_eq!(group.copies[1].relocating_node_id.as_deref(), Some("node3"));

        let unassigned = table.index("logs").unwrap().shard(1).unwrap();
        assert!(!unassigned.copies[0].assigned_to_node());
        assert!(table.index("metrics").unwrap().shards.is_empty());
    }

    #[test]
    fn test_to_cluster_state_blocks() {
        let mut config = RoutingConfig::from_toml(ROUTING).unwrap();
        let state = config.to_cluster_state("node9", 3).unwrap();
        assert_eq!(state.version, 3);
        assert_eq!(state.local_node_id, "node9");
        assert!(!state.blocks.disable_state_persistence());

        config.disable_state_persistence = true;
        let state = config.to_cluster_state("node9", 4).unwrap();
        assert!(state.blocks.disable_state_persistence());
    }

    #[test]
    fn test_validation_duplicate_index() {
        let toml = r#"
            [[indices]]
            name = "logs"

            [[indices]]
            name = "logs"
        "#;
        let config = RoutingConfig::from_toml(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_shard() {
        let toml = r#"
            [[indices]]
            name = "logs"

            [[indices.shards]]
            id = 0

            [[indices.shards]]
            id = 0
        "#;
        let config = RoutingConfig::from_toml(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_copy_rules() {
        let started_without_node = r#"
            [[indices]]
            name = "logs"
            [[indices.shards]]
            id = 0
            [[indices.shards.copies]]
            state = "started"
        "#;
        assert!(RoutingConfig::from_toml(started_without_node).unwrap().validate().is_err());

        let relocating_without_target = r#"
            [[indices]]
            name = "logs"
            [[indices.shards]]
            id = 0
            [[indices.shards.copies]]
            node = "node1"
            state = "relocating"
        "#;
        assert!(RoutingConfig::from_toml(relocating_without_target).unwrap().validate().is_err());

        let relocating_to_self = r#"
            [[indices]]
            name = "logs"
            [[indices.shards]]
            id = 0
            [[indices.shards.copies]]
            node = "node1"
            relocating_node = "node1"
            state = "relocating"
        "#;
        assert!(RoutingConfig::from_toml(relocating_to_self).unwrap().validate().is_err());
    }

    #[test]
    fn test_invalid_state_name() {
        let toml = r#"
            [[indices]]
            name = "logs"
            [[indices.shards]]
            id = 0
            [[indices.shards.copies]]
            node = "node1"
            state = "sleeping"
        "#;
        assert!(RoutingConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("routing.toml");
        std::fs::write(&path, ROUTING).unwrap();

        let config = RoutingConfig::from_file(&path).unwrap();
        assert_eq!(config.indices[0].name, "logs");

        assert!(RoutingConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
