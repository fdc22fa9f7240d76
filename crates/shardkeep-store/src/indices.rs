//! Indices opened on this node
//!
//! `IndicesService` maps index names to the `IndexService` that owns the
//! index's shards on this node. Each index service exposes an `IndexStore`
//! able to remove data for shards it no longer holds.

use crate::env::NodeEnvironment;
use crate::error::{Result, StoreError};
use dashmap::DashMap;
use parking_lot::RwLock;
use shardkeep_core::ShardId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Store-level operations of one index
pub trait IndexStore: Send + Sync {
    /// Whether the shard's data may be removed: the shard is not held by
    /// this node and has data on disk
    fn can_delete_unallocated(&self, shard_id: &ShardId) -> bool;

    /// Remove the data of a shard this node does not hold
    fn delete_unallocated(&self, shard_id: &ShardId) -> Result<()>;
}

/// An index opened on this node
pub trait IndexService: Send + Sync {
    /// Index name
    fn index(&self) -> &str;

    /// Whether shard `id` is currently held by this node
    fn has_shard(&self, id: u32) -> bool;

    fn store(&self) -> &dyn IndexStore;
}

/// Filesystem-backed index store
pub struct FsIndexStore {
    index: String,
    node_env: Arc<NodeEnvironment>,
    /// Shards held by the owning index service
    held: Arc<RwLock<BTreeSet<u32>>>,
}

impl FsIndexStore {
    fn holds(&self, shard_id: &ShardId) -> bool {
        shard_id.index == self.index && self.held.read().contains(&shard_id.id)
    }
}

impl IndexStore for FsIndexStore {
    fn can_delete_unallocated(&self, shard_id: &ShardId) -> bool {
        if !self.node_env.has_node_file() || shard_id.index != self.index {
            return false;
        }
        if self.holds(shard_id) {
            return false;
        }
        self.node_env.shard_exists(shard_id)
    }

    fn delete_unallocated(&self, shard_id: &ShardId) -> Result<()> {
        if !self.node_env.has_node_file() {
            return Ok(());
        }
        if self.holds(shard_id) {
            return Err(StoreError::ShardAllocated(shard_id.clone()));
        }
        let locations = self.node_env.shard_locations(shard_id)?;
        debug!("{} deleting unallocated shard data at {:?}", shard_id, locations);
        self.node_env.delete_recursively(&locations)?;
        Ok(())
    }
}

/// Index service backed by the node's data paths
pub struct LocalIndexService {
    index: String,
    shards: Arc<RwLock<BTreeSet<u32>>>,
    store: FsIndexStore,
}

impl LocalIndexService {
    pub fn new(index: impl Into<String>, node_env: Arc<NodeEnvironment>) -> Self {
        let index = index.into();
        let shards = Arc::new(RwLock::new(BTreeSet::new()));
        let store = FsIndexStore {
            index: index.clone(),
            node_env,
            held: Arc::clone(&shards),
        };
        Self {
            index,
            shards,
            store,
        }
    }

    /// Start holding a shard; returns false if already held
    pub fn add_shard(&self, id: u32) -> bool {
        self.shards.write().insert(id)
    }

    /// Stop holding a shard; returns false if not held
    pub fn remove_shard(&self, id: u32) -> bool {
        self.shards.write().remove(&id)
    }

    /// Held shard ordinals in ascending order
    pub fn shard_ids(&self) -> Vec<u32> {
        self.shards.read().iter().copied().collect()
    }
}

impl IndexService for LocalIndexService {
    fn index(&self) -> &str {
        &self.index
    }

    fn has_shard(&self, id: u32) -> bool {
        self.shards.read().contains(&id)
    }

    fn store(&self) -> &dyn IndexStore {
        &self.store
    }
}

/// Registry of indices opened on this node
#[derive(Default)]
pub struct IndicesService {
    indices: DashMap<String, Arc<dyn IndexService>>,
}

impl IndicesService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index service for `index`, if the index is open here
    pub fn index_service(&self, index: &str) -> Option<Arc<dyn IndexService>> {
        self.indices.get(index).map(|entry| Arc::clone(entry.value()))
    }

    /// Open an index; returns the service it replaced
    pub fn register(&self, service: Arc<dyn IndexService>) -> Option<Arc<dyn IndexService>> {
        let name = service.index().to_string();
        info!("opened index [{}]", name);
        self.indices.insert(name, service)
    }

    /// Close an index
    pub fn remove(&self, index: &str) -> Option<Arc<dyn IndexService>> {
        let removed = self.indices.remove(index).map(|(_, service)| service);
        if removed.is_some() {
            info!("closed index [{}]", index);
        }
        removed
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indices.contains_key(index)
    }

    /// Names of open indices, sorted
    pub fn indices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<NodeEnvironment>) {
        let dir = TempDir::new().unwrap();
        let env = Arc::new(NodeEnvironment::open(&[dir.path().to_path_buf()]).unwrap());
        (dir, env)
    }

    fn write_shard(env: &NodeEnvironment, shard_id: &ShardId) {
        for location in env.shard_locations(shard_id).unwrap() {
            std::fs::create_dir_all(&location).unwrap();
            std::fs::write(location.join("segments_1"), b"seg").unwrap();
        }
    }

    #[test]
    fn test_held_shard_is_protected() {
        let (_dir, env) = setup();
        let service = LocalIndexService::new("logs", env.clone());
        let shard = ShardId::new("logs", 0);
        write_shard(&env, &shard);

        assert!(service.add_shard(0));
        assert!(!service.add_shard(0));
        assert!(service.has_shard(0));
        assert!(!service.store().can_delete_unallocated(&shard));
        assert!(matches!(
            service.store().delete_unallocated(&shard),
            Err(StoreError::ShardAllocated(_))
        ));
        assert!(env.shard_exists(&shard));
    }

    #[test]
    fn test_unheld_shard_is_deleted() {
        let (_dir, env) = setup();
        let service = LocalIndexService::new("logs", env.clone());
        let shard = ShardId::new("logs", 1);
        write_shard(&env, &shard);

        service.add_shard(1);
        assert!(service.remove_shard(1));
        assert!(service.shard_ids().is_empty());

        assert!(service.store().can_delete_unallocated(&shard));
        service.store().delete_unallocated(&shard).unwrap();
        assert!(!env.shard_exists(&shard));
        assert!(!service.store().can_delete_unallocated(&shard));
    }

    #[test]
    fn test_other_index_not_deletable() {
        let (_dir, env) = setup();
        let service = LocalIndexService::new("logs", env.clone());
        let foreign = ShardId::new("metrics", 0);
        write_shard(&env, &foreign);

        assert!(!service.store().can_delete_unallocated(&foreign));
    }

    #[test]
    fn test_registry() {
        let (_dir, env) = setup();
        let indices = IndicesService::new();
        assert!(indices.is_empty());

        indices.register(Arc::new(LocalIndexService::new("metrics", env.clone())));
        indices.register(Arc::new(LocalIndexService::new("logs", env.clone())));
        assert_eq!(indices.indices(), vec!["logs".to_string(), "metrics".to_string()]);
        assert!(indices.index_service("logs").is_some());
        assert!(indices.has_index("metrics"));

        assert!(indices.remove("logs").is_some());
        assert!(indices.remove("logs").is_none());
        assert!(indices.index_service("logs").is_none());
        assert_eq!(indices.len(), 1);
    }
}
