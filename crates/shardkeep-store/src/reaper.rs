//! Unused shard cleanup
//!
//! On every routing table change the reaper walks all shard groups and
//! removes local data of groups that are fully started on other nodes.
//! Data is only removed once no copy is initializing or relocating and
//! none of the copies references this node.

use crate::env::NodeEnvironment;
use crate::indices::IndicesService;
use shardkeep_cluster::ClusterStateListener;
use shardkeep_core::{ClusterChangedEvent, IndexShardRoutingTable, ShardId};
use std::sync::Arc;
use tracing::{debug, trace};

/// Why a reap pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RoutingTableUnchanged,
    StatePersistenceDisabled,
}

/// A shard whose deletion failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDeletionFailure {
    pub shard_id: ShardId,
    pub reason: String,
}

/// Outcome of one reap pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Set when the event was ignored as a whole
    pub skipped: Option<SkipReason>,
    /// Shard groups examined
    pub evaluated: usize,
    /// Groups that passed the deletion predicate
    pub deletable: usize,
    /// Shards whose local data was removed
    pub deleted: Vec<ShardId>,
    /// Shards whose removal failed
    pub failed: Vec<ShardDeletionFailure>,
    /// Deletable shards still held by an open index on this node
    pub still_allocated: Vec<ShardId>,
}

impl ReapReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Whether the local copy of a shard group may be removed.
///
/// The group must be non-empty, every copy must be started, and no copy
/// may sit on or relocate to `local_node_id`.
pub fn shard_can_be_deleted(group: &IndexShardRoutingTable, local_node_id: &str) -> bool {
    if group.is_empty() {
        return false;
    }
    group
        .iter()
        .all(|copy| copy.started() && !copy.references_node(local_node_id))
}

/// Deletes local shard data no longer routed to this node
pub struct ShardReaper {
    node_env: Arc<NodeEnvironment>,
    indices_service: Arc<IndicesService>,
}

impl ShardReaper {
    pub fn new(node_env: Arc<NodeEnvironment>, indices_service: Arc<IndicesService>) -> Self {
        Self {
            node_env,
            indices_service,
        }
    }

    /// Process one cluster change. Deletion failures are recorded per shard
    /// and never stop the pass.
    pub fn reap(&self, event: &ClusterChangedEvent) -> ReapReport {
        if !event.routing_table_changed() {
            return ReapReport::skipped(SkipReason::RoutingTableUnchanged);
        }
        if event.state.blocks.disable_state_persistence() {
            trace!("state persistence disabled, not deleting shards");
            return ReapReport::skipped(SkipReason::StatePersistenceDisabled);
        }

        let local_node_id = event.state.local_node_id.as_str();
        let mut report = ReapReport::default();

        for index_table in event.state.routing_table.iter() {
            for group in index_table.iter() {
                report.evaluated += 1;
                if !shard_can_be_deleted(group, local_node_id) {
                    continue;
                }
                report.deletable += 1;
                self.delete_shard(&index_table.index, &group.shard_id, &mut report);
            }
        }

        report
    }

    /// `index` is the routing table key the group was found under; the open
    /// index is looked up by it, not by the group's own shard id.
    fn delete_shard(&self, index: &str, shard_id: &ShardId, report: &mut ReapReport) {
        match self.indices_service.index_service(index) {
            None => {
                if !self.node_env.has_node_file() {
                    return;
                }
                let locations = match self.node_env.shard_locations(shard_id) {
                    Ok(locations) => locations,
                    Err(e) => {
                        debug!("{} failed to resolve shard locations: {}", shard_id, e);
                        report.failed.push(ShardDeletionFailure {
                            shard_id: shard_id.clone(),
                            reason: e.to_string(),
                        });
                        return;
                    }
                };
                if !locations.iter().any(|p| p.exists()) {
                    trace!("{} no local data", shard_id);
                    return;
                }

                debug!("{} deleting shard that is no longer used", shard_id);
                match self.node_env.delete_recursively(&locations) {
                    Ok(()) => report.deleted.push(shard_id.clone()),
                    Err(e) => {
                        debug!("{} failed to delete shard data: {}", shard_id, e);
                        report.failed.push(ShardDeletionFailure {
                            shard_id: shard_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Some(index_service) => {
                if index_service.has_shard(shard_id.id) {
                    debug!(
                        "{} routed away from this node but still allocated locally, leaving it",
                        shard_id
                    );
                    report.still_allocated.push(shard_id.clone());
                    return;
                }

                let store = index_service.store();
                if !store.can_delete_unallocated(shard_id) {
                    return;
                }
                debug!("{} deleting shard that is no longer used", shard_id);
                match store.delete_unallocated(shard_id) {
                    Ok(()) => report.deleted.push(shard_id.clone()),
                    Err(e) => {
                        debug!("{} failed to delete unallocated shard, ignoring: {}", shard_id, e);
                        report.failed.push(ShardDeletionFailure {
                            shard_id: shard_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }
}

impl ClusterStateListener for ShardReaper {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        let report = self.reap(event);
        if !report.deleted.is_empty() || !report.failed.is_empty() {
            debug!(
                "cluster state [{}]: deleted {} unused shard(s), {} failure(s)",
                event.state.version,
                report.deleted.len(),
                report.failed.len()
            );
        }
    }
}
