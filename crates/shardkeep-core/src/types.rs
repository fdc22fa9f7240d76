//! Cluster routing model
//!
//! Routing tables are produced outside this node and replaced wholesale on
//! every cluster change. Nothing here is mutated after a `ClusterState` is
//! built; snapshots are shared as `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identifier of a cluster node
pub type NodeId = String;

/// Stable identity of a shard across the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    /// Index name
    pub index: String,
    /// Shard ordinal within the index
    pub id: u32,
}

impl ShardId {
    /// Create a new shard id
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// Lifecycle state of a single shard copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardRoutingState {
    /// Not assigned to any node
    #[default]
    Unassigned,
    /// Assigned and recovering
    Initializing,
    /// Recovered and serving
    Started,
    /// Serving while being moved to another node
    Relocating,
    /// Copy failed and awaits removal
    Failed,
}

impl ShardRoutingState {
    /// Lowercase name as used in routing files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardRoutingState::Unassigned => "unassigned",
            ShardRoutingState::Initializing => "initializing",
            ShardRoutingState::Started => "started",
            ShardRoutingState::Relocating => "relocating",
            ShardRoutingState::Failed => "failed",
        }
    }
}

impl fmt::Display for ShardRoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One copy (primary or replica) of a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    /// Shard this copy belongs to
    pub shard_id: ShardId,
    /// Node currently holding the copy
    pub current_node_id: Option<NodeId>,
    /// Target node while relocating
    pub relocating_node_id: Option<NodeId>,
    /// Whether this is the primary copy
    pub primary: bool,
    /// Lifecycle state
    pub state: ShardRoutingState,
}

impl ShardRouting {
    /// Create an unassigned copy
    pub fn unassigned(shard_id: ShardId, primary: bool) -> Self {
        Self {
            shard_id,
            current_node_id: None,
            relocating_node_id: None,
            primary,
            state: ShardRoutingState::Unassigned,
        }
    }

    /// Create a copy in the given state on a node
    pub fn new(
        shard_id: ShardId,
        node_id: impl Into<NodeId>,
        primary: bool,
        state: ShardRoutingState,
    ) -> Self {
        Self {
            shard_id,
            current_node_id: Some(node_id.into()),
            relocating_node_id: None,
            primary,
            state,
        }
    }

    /// Create a copy relocating from `node_id` to `target_node_id`
    pub fn relocating(
        shard_id: ShardId,
        node_id: impl Into<NodeId>,
        target_node_id: impl Into<NodeId>,
        primary: bool,
    ) -> Self {
        Self {
            shard_id,
            current_node_id: Some(node_id.into()),
            relocating_node_id: Some(target_node_id.into()),
            primary,
            state: ShardRoutingState::Relocating,
        }
    }

    /// True only for `Started`; a relocating copy is active but not started
    pub fn started(&self) -> bool {
        self.state == ShardRoutingState::Started
    }

    /// True for copies serving traffic (`Started` or `Relocating`)
    pub fn active(&self) -> bool {
        matches!(
            self.state,
            ShardRoutingState::Started | ShardRoutingState::Relocating
        )
    }

    /// Whether the copy has a current node
    pub fn assigned_to_node(&self) -> bool {
        self.current_node_id.is_some()
    }

    /// Whether `node_id` holds this copy or receives it through relocation
    pub fn references_node(&self, node_id: &str) -> bool {
        self.current_node_id.as_deref() == Some(node_id)
            || self.relocating_node_id.as_deref() == Some(node_id)
    }
}

/// The replication group of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    /// Shard shared by every copy
    pub shard_id: ShardId,
    /// Primary and replica copies
    pub copies: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    /// Create an empty replication group
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            copies: Vec::new(),
        }
    }

    /// Add a copy
    pub fn with_copy(mut self, copy: ShardRouting) -> Self {
        self.copies.push(copy);
        self
    }

    /// Number of copies
    pub fn size(&self) -> usize {
        self.copies.len()
    }

    /// Whether the group has no copies at all
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Iterate copies
    pub fn iter(&self) -> std::slice::Iter<'_, ShardRouting> {
        self.copies.iter()
    }

    /// Primary copy, if any
    pub fn primary(&self) -> Option<&ShardRouting> {
        self.copies.iter().find(|c| c.primary)
    }

    /// Whether every copy is started (vacuously true for an empty group)
    pub fn all_started(&self) -> bool {
        self.copies.iter().all(ShardRouting::started)
    }

    /// Whether any copy is on, or relocating to, `node_id`
    pub fn references_node(&self, node_id: &str) -> bool {
        self.copies.iter().any(|c| c.references_node(node_id))
    }
}

impl<'a> IntoIterator for &'a IndexShardRoutingTable {
    type Item = &'a ShardRouting;
    type IntoIter = std::slice::Iter<'a, ShardRouting>;

    fn into_iter(self) -> Self::IntoIter {
        self.copies.iter()
    }
}

/// Routing of all shards of one index, ordered by shard ordinal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    /// Index name
    pub index: String,
    /// Shard groups by ordinal
    pub shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    /// Create an index routing table without shards
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            shards: BTreeMap::new(),
        }
    }

    /// Add or replace a shard group
    pub fn with_shard(mut self, group: IndexShardRoutingTable) -> Self {
        self.shards.insert(group.shard_id.id, group);
        self
    }

    /// Shard group by ordinal
    pub fn shard(&self, id: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&id)
    }

    /// Iterate shard groups in ordinal order
    pub fn iter(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.shards.values()
    }
}

/// Cluster-wide routing table, ordered by index name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Version assigned by the producer
    pub version: u64,
    /// Index routing tables by name
    pub indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    /// Create an empty routing table
    pub fn new(version: u64) -> Self {
        Self {
            version,
            indices: BTreeMap::new(),
        }
    }

    /// Add or replace an index
    pub fn with_index(mut self, index: IndexRoutingTable) -> Self {
        self.indices.insert(index.index.clone(), index);
        self
    }

    /// Index routing table by name
    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(name)
    }

    /// Iterate indices in name order
    pub fn iter(&self) -> impl Iterator<Item = &IndexRoutingTable> {
        self.indices.values()
    }

    /// Total number of shard groups
    pub fn shard_group_count(&self) -> usize {
        self.indices.values().map(|i| i.shards.len()).sum()
    }
}

/// A cluster-level block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBlock {
    /// Block id
    pub id: u32,
    /// Human readable description
    pub description: String,
    /// Whether the cluster view must not be treated as durable
    pub disable_state_persistence: bool,
}

/// Block present until the cluster state has been recovered
pub fn state_not_recovered_block() -> ClusterBlock {
    ClusterBlock {
        id: 1,
        description: "state not recovered / initialized".to_string(),
        disable_state_persistence: true,
    }
}

/// Global cluster blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBlocks {
    /// Active global blocks
    pub global: Vec<ClusterBlock>,
}

impl ClusterBlocks {
    /// No blocks
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a block, ignoring duplicates by id
    pub fn with_block(mut self, block: ClusterBlock) -> Self {
        if !self.global.iter().any(|b| b.id == block.id) {
            self.global.push(block);
        }
        self
    }

    /// Whether any block disables state persistence
    pub fn disable_state_persistence(&self) -> bool {
        self.global.iter().any(|b| b.disable_state_persistence)
    }

    /// Whether a block with the given id is set
    pub fn has_global_block(&self, id: u32) -> bool {
        self.global.iter().any(|b| b.id == id)
    }
}

/// Immutable snapshot of the cluster as seen by this node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    /// State version
    pub version: u64,
    /// Id of the node holding this snapshot
    pub local_node_id: NodeId,
    /// Routing table
    pub routing_table: Arc<RoutingTable>,
    /// Cluster blocks
    pub blocks: ClusterBlocks,
}

impl ClusterState {
    /// Create a snapshot
    pub fn new(
        version: u64,
        local_node_id: impl Into<NodeId>,
        routing_table: RoutingTable,
        blocks: ClusterBlocks,
    ) -> Self {
        Self {
            version,
            local_node_id: local_node_id.into(),
            routing_table: Arc::new(routing_table),
            blocks,
        }
    }

    /// Initial snapshot of a node that has not recovered cluster state yet
    pub fn initial(local_node_id: impl Into<NodeId>) -> Self {
        Self::new(
            0,
            local_node_id,
            RoutingTable::default(),
            ClusterBlocks::empty().with_block(state_not_recovered_block()),
        )
    }

    /// Same snapshot with a new version and routing table
    pub fn with_routing_table(&self, version: u64, routing_table: RoutingTable) -> Self {
        Self {
            version,
            local_node_id: self.local_node_id.clone(),
            routing_table: Arc::new(routing_table),
            blocks: self.blocks.clone(),
        }
    }

    /// Same snapshot with a new version and blocks
    pub fn with_blocks(&self, version: u64, blocks: ClusterBlocks) -> Self {
        Self {
            version,
            local_node_id: self.local_node_id.clone(),
            routing_table: Arc::clone(&self.routing_table),
            blocks,
        }
    }
}

/// A (previous, new) pair of cluster snapshots
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    /// What produced the change
    pub source: String,
    /// New snapshot
    pub state: Arc<ClusterState>,
    /// Snapshot replaced by `state`
    pub previous_state: Arc<ClusterState>,
}

impl ClusterChangedEvent {
    /// Create an event
    pub fn new(
        source: impl Into<String>,
        state: Arc<ClusterState>,
        previous_state: Arc<ClusterState>,
    ) -> Self {
        Self {
            source: source.into(),
            state,
            previous_state,
        }
    }

    /// Whether the routing table differs between the two snapshots
    pub fn routing_table_changed(&self) -> bool {
        let previous = &self.previous_state.routing_table;
        let current = &self.state.routing_table;
        !Arc::ptr_eq(previous, current) && previous != current
    }

    /// Whether the blocks differ between the two snapshots
    pub fn blocks_changed(&self) -> bool {
        self.previous_state.blocks != self.state.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(index: &str, shard: u32, node: &str, primary: bool) -> ShardRouting {
        ShardRouting::new(
            ShardId::new(index, shard),
            node,
            primary,
            ShardRoutingState::Started,
        )
    }

    fn table(version: u64, node: &str) -> RoutingTable {
        RoutingTable::new(version).with_index(
            IndexRoutingTable::new("logs").with_shard(
                IndexShardRoutingTable::new(ShardId::new("logs", 0))
                    .with_copy(started("logs", 0, node, true)),
            ),
        )
    }

    #[test]
    fn test_shard_id_display() {
        assert_eq!(ShardId::new("logs", 3).to_string(), "[logs][3]");
    }

    #[test]
    fn test_started_vs_active() {
        let id = ShardId::new("logs", 0);
        let copy = ShardRouting::relocating(id.clone(), "node1", "node2", true);
        assert!(copy.active());
        assert!(!copy.started());

        let copy = ShardRouting::new(id.clone(), "node1", false, ShardRoutingState::Started);
        assert!(copy.active());
        assert!(copy.started());

        let copy = ShardRouting::unassigned(id, false);
        assert!(!copy.active());
        assert!(!copy.assigned_to_node());
    }

    #[test]
    fn test_references_node() {
        let copy = ShardRouting::relocating(ShardId::new("logs", 0), "node1", "node2", true);
        assert!(copy.references_node("node1"));
        assert!(copy.references_node("node2"));
        assert!(!copy.references_node("node3"));
    }

    #[test]
    fn test_group_helpers() {
        let group = IndexShardRoutingTable::new(ShardId::new("logs", 0))
            .with_copy(started("logs", 0, "node1", true))
            .with_copy(ShardRouting::new(
                ShardId::new("logs", 0),
                "node2",
                false,
                ShardRoutingState::Initializing,
            ));

        assert_eq!(group.size(), 2);
        assert!(!group.all_started());
        assert!(group.references_node("node2"));
        assert_eq!(group.primary().unwrap().current_node_id.as_deref(), Some("node1"));

        let empty = IndexShardRoutingTable::new(ShardId::new("logs", 1));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_routing_table_ordering() {
        let rt = RoutingTable::new(1)
            .with_index(IndexRoutingTable::new("zeta"))
            .with_index(
                IndexRoutingTable::new("alpha")
                    .with_shard(IndexShardRoutingTable::new(ShardId::new("alpha", 2)))
                    .with_shard(IndexShardRoutingTable::new(ShardId::new("alpha", 0))),
            );

        let names: Vec<&str> = rt.iter().map(|i| i.index.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let ordinals: Vec<u32> = rt.index("alpha").unwrap().iter().map(|g| g.shard_id.id).collect();
        assert_eq!(ordinals, vec![0, 2]);
        assert_eq!(rt.shard_group_count(), 2);
    }

    #[test]
    fn test_routing_table_changed() {
        let base = Arc::new(ClusterState::new(1, "node1", table(1, "node2"), ClusterBlocks::empty()));

        // Same Arc: unchanged
        let same = Arc::new(base.with_blocks(2, ClusterBlocks::empty()));
        let event = ClusterChangedEvent::new("test", Arc::clone(&same), Arc::clone(&base));
        assert!(!event.routing_table_changed());

        // Equal content in a new Arc: unchanged
        let equal = Arc::new(base.with_routing_table(3, table(1, "node2")));
        let event = ClusterChangedEvent::new("test", equal, Arc::clone(&base));
        assert!(!event.routing_table_changed());

        // Different content: changed
        let moved = Arc::new(base.with_routing_table(4, table(2, "node3")));
        let event = ClusterChangedEvent::new("test", moved, Arc::clone(&base));
        assert!(event.routing_table_changed());
    }

    #[test]
    fn test_blocks() {
        let state = ClusterState::initial("node1");
        assert!(state.blocks.disable_state_persistence());
        assert!(state.blocks.has_global_block(1));

        let blocks = ClusterBlocks::empty()
            .with_block(state_not_recovered_block())
            .with_block(state_not_recovered_block());
        assert_eq!(blocks.global.len(), 1);

        assert!(!ClusterBlocks::empty().disable_state_persistence());
    }
}
