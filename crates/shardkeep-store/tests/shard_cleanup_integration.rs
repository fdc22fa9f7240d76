use parking_lot::Mutex;
use shardkeep_cluster::ClusterService;
use shardkeep_core::{
    state_not_recovered_block, ClusterBlocks, ClusterState, IndexRoutingTable,
    IndexShardRoutingTable, RoutingTable, ShardId, ShardRouting, ShardRoutingState,
};
use shardkeep_settings::{NodeSettingsService, Settings};
use shardkeep_store::{
    IndexService, IndexStore, IndicesService, IndicesStore, LocalIndexService, NodeEnvironment,
    ReapReport, ShardReaper, SkipReason, StoreError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const LOCAL: &str = "node1";

struct TestNode {
    env: Arc<NodeEnvironment>,
    indices: Arc<IndicesService>,
    cluster: Arc<ClusterService>,
    reaper: ShardReaper,
    version: Mutex<u64>,
    _dir: TempDir,
}

impl TestNode {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let env = Arc::new(
            NodeEnvironment::open(&[dir.path().join("data1"), dir.path().join("data2")]).unwrap(),
        );
        let indices = Arc::new(IndicesService::new());
        let cluster = Arc::new(ClusterService::new(ClusterState::initial(LOCAL)));
        let reaper = ShardReaper::new(Arc::clone(&env), Arc::clone(&indices));

        Self {
            env,
            indices,
            cluster,
            reaper,
            version: Mutex::new(0),
            _dir: dir,
        }
    }

    fn next_version(&self) -> u64 {
        let mut version = self.version.lock();
        *version += 1;
        *version
    }

    fn write_shard(&self, index: &str, id: u32) -> ShardId {
        let shard_id = ShardId::new(index, id);
        for location in self.env.shard_locations(&shard_id).unwrap() {
            std::fs::create_dir_all(location.join("index")).unwrap();
            std::fs::write(location.join("index").join("segments_1"), b"segment").unwrap();
        }
        shard_id
    }

    fn publish_state(&self, routing: RoutingTable, blocks: ClusterBlocks) -> ReapReport {
        let version = self.next_version();
        let state = ClusterState::new(version, LOCAL, routing, blocks);
        let event = self.cluster.publish("test", state);
        self.reaper.reap(&event)
    }

    fn publish(&self, routing: RoutingTable) -> ReapReport {
        self.publish_state(routing, ClusterBlocks::empty())
    }
}

fn started(index: &str, id: u32, node: &str, primary: bool) -> ShardRouting {
    ShardRouting::new(ShardId::new(index, id), node, primary, ShardRoutingState::Started)
}

fn routing(version: u64, groups: Vec<(&str, u32, Vec<ShardRouting>)>) -> RoutingTable {
    let mut indices: Vec<IndexRoutingTable> = Vec::new();
    for (index, id, copies) in groups {
        let group = copies
            .into_iter()
            .fold(IndexShardRoutingTable::new(ShardId::new(index, id)), |g, c| g.with_copy(c));
        match indices.iter().position(|t| t.index == index) {
            Some(pos) => {
                let table = indices.remove(pos).with_shard(group);
                indices.push(table);
            }
            None => indices.push(IndexRoutingTable::new(index).with_shard(group)),
        }
    }
    indices
        .into_iter()
        .fold(RoutingTable::new(version), |rt, t| rt.with_index(t))
}

#[test]
fn shard_started_elsewhere_is_deleted_once() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);

    let rt = routing(
        1,
        vec![(
            "logs",
            0,
            vec![started("logs", 0, "node2", true), started("logs", 0, "node3", false)],
        )],
    );
    let report = node.publish(rt);
    assert_eq!(report.deleted, vec![shard.clone()]);
    assert!(report.failed.is_empty());
    assert!(!node.env.shard_exists(&shard));

    // Same placement again: nothing left to delete, nothing fails
    let rt = routing(
        2,
        vec![(
            "logs",
            0,
            vec![started("logs", 0, "node2", true), started("logs", 0, "node3", false)],
        )],
    );
    let report = node.publish(rt);
    assert_eq!(report.deletable, 1);
    assert!(report.deleted.is_empty());
    assert!(report.failed.is_empty());
}

#[test]
fn copy_on_local_node_protects_data() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);

    let rt = routing(
        1,
        vec![(
            "logs",
            0,
            vec![started("logs", 0, "node2", true), started("logs", 0, LOCAL, false)],
        )],
    );
    let report = node.publish(rt);
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.deletable, 0);
    assert!(node.env.shard_exists(&shard));
}

#[test]
fn relocation_onto_local_node_protects_data() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);

    let rt = routing(
        1,
        vec![("logs", 0, vec![ShardRouting::relocating(shard.clone(), "node2", LOCAL, true)])],
    );
    node.publish(rt);
    assert!(node.env.shard_exists(&shard));
}

#[test]
fn initializing_copy_delays_deletion() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);

    let rt = routing(
        1,
        vec![(
            "logs",
            0,
            vec![
                started("logs", 0, "node2", true),
                ShardRouting::new(shard.clone(), "node3", false, ShardRoutingState::Initializing),
            ],
        )],
    );
    let report = node.publish(rt);
    assert!(report.deleted.is_empty());
    assert!(node.env.shard_exists(&shard));

    let rt = routing(
        2,
        vec![(
            "logs",
            0,
            vec![started("logs", 0, "node2", true), started("logs", 0, "node3", false)],
        )],
    );
    let report = node.publish(rt);
    assert_eq!(report.deleted, vec![shard.clone()]);
    assert!(!node.env.shard_exists(&shard));
}

#[test]
fn empty_group_is_kept() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);

    let report = node.publish(routing(1, vec![("logs", 0, vec![])]));
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.deletable, 0);
    assert!(node.env.shard_exists(&shard));
}

#[test]
fn unchanged_routing_table_is_skipped() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);
    let rt = routing(1, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    node.publish_state(rt, ClusterBlocks::empty().with_block(state_not_recovered_block()));

    // Lifting the block alone does not revisit the routing table
    let version = node.next_version();
    let state = node.cluster.state().with_blocks(version, ClusterBlocks::empty());
    let event = node.cluster.publish("blocks-only", state);
    let report = node.reaper.reap(&event);
    assert_eq!(report.skipped, Some(SkipReason::RoutingTableUnchanged));
    assert!(node.env.shard_exists(&shard));
}

#[test]
fn disabled_state_persistence_is_skipped() {
    let node = TestNode::new();
    let shard = node.write_shard("logs", 0);

    let rt = routing(1, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    let report =
        node.publish_state(rt, ClusterBlocks::empty().with_block(state_not_recovered_block()));
    assert_eq!(report.skipped, Some(SkipReason::StatePersistenceDisabled));
    assert!(node.env.shard_exists(&shard));

    // Same placement once the block lifts
    let rt = routing(2, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    let report = node.publish(rt);
    assert_eq!(report.deleted, vec![shard.clone()]);
}

struct BrokenIndex {
    store: BrokenStore,
}

struct BrokenStore;

impl IndexStore for BrokenStore {
    fn can_delete_unallocated(&self, _shard_id: &ShardId) -> bool {
        true
    }

    fn delete_unallocated(&self, _shard_id: &ShardId) -> shardkeep_store::Result<()> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

impl IndexService for BrokenIndex {
    fn index(&self) -> &str {
        "broken"
    }

    fn has_shard(&self, _id: u32) -> bool {
        false
    }

    fn store(&self) -> &dyn IndexStore {
        &self.store
    }
}

#[test]
fn failure_on_one_shard_does_not_stop_others() {
    let node = TestNode::new();
    node.indices.register(Arc::new(BrokenIndex { store: BrokenStore }));
    let healthy = node.write_shard("logs", 0);

    let rt = routing(
        1,
        vec![
            ("broken", 0, vec![started("broken", 0, "node2", true)]),
            ("logs", 0, vec![started("logs", 0, "node2", true)]),
        ],
    );
    let report = node.publish(rt);

    assert_eq!(report.deletable, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].shard_id, ShardId::new("broken", 0));
    assert_eq!(report.deleted, vec![healthy.clone()]);
    assert!(!node.env.shard_exists(&healthy));
}

struct GuardedIndex {
    name: &'static str,
    store: GuardedStore,
}

struct GuardedStore {
    allow: bool,
    checks: AtomicUsize,
    deletes: AtomicUsize,
}

impl GuardedIndex {
    fn new(name: &'static str, allow: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            store: GuardedStore {
                allow,
                checks: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            },
        })
    }
}

impl IndexStore for GuardedStore {
    fn can_delete_unallocated(&self, _shard_id: &ShardId) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.allow
    }

    fn delete_unallocated(&self, _shard_id: &ShardId) -> shardkeep_store::Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl IndexService for GuardedIndex {
    fn index(&self) -> &str {
        self.name
    }

    fn has_shard(&self, _id: u32) -> bool {
        false
    }

    fn store(&self) -> &dyn IndexStore {
        &self.store
    }
}

#[test]
fn store_refusing_deletion_is_not_asked_to_delete() {
    let node = TestNode::new();
    let index = GuardedIndex::new("logs", false);
    node.indices.register(index.clone());

    let rt = routing(1, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    let report = node.publish(rt);

    assert_eq!(report.deletable, 1);
    assert_eq!(index.store.checks.load(Ordering::SeqCst), 1);
    assert_eq!(index.store.deletes.load(Ordering::SeqCst), 0);
    assert!(report.deleted.is_empty());
    assert!(report.failed.is_empty());
}

#[test]
fn store_allowing_deletion_is_asked_once() {
    let node = TestNode::new();
    let index = GuardedIndex::new("logs", true);
    node.indices.register(index.clone());

    let rt = routing(1, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    let report = node.publish(rt);

    assert_eq!(index.store.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(report.deleted, vec![ShardId::new("logs", 0)]);
}

#[test]
fn open_index_is_found_by_routing_table_key() {
    let node = TestNode::new();
    let other = GuardedIndex::new("other", true);
    node.indices.register(other.clone());

    // A group filed under "logs" whose shard id names "other"
    let group = IndexShardRoutingTable::new(ShardId::new("other", 0))
        .with_copy(started("other", 0, "node2", true));
    let rt = RoutingTable::new(1).with_index(IndexRoutingTable::new("logs").with_shard(group));
    let report = node.publish(rt);

    assert_eq!(report.deletable, 1);
    assert_eq!(other.store.checks.load(Ordering::SeqCst), 0);
    assert_eq!(other.store.deletes.load(Ordering::SeqCst), 0);
}

#[test]
fn filesystem_failures_are_isolated_per_shard() {
    let node = TestNode::new();
    let healthy = node.write_shard("logs", 0);

    // A regular file where the shard directory should be cannot be removed
    // as a directory tree
    let blocked = ShardId::new("blocked", 0);
    let location = node.env.shard_locations(&blocked).unwrap().remove(0);
    std::fs::create_dir_all(location.parent().unwrap()).unwrap();
    std::fs::write(&location, b"not a directory").unwrap();

    let rt = routing(
        1,
        vec![
            ("..", 0, vec![started("..", 0, "node2", true)]),
            ("blocked", 0, vec![started("blocked", 0, "node2", true)]),
            ("logs", 0, vec![started("logs", 0, "node2", true)]),
        ],
    );
    let report = node.publish(rt);

    assert_eq!(report.deletable, 3);
    let failed: Vec<ShardId> = report.failed.iter().map(|f| f.shard_id.clone()).collect();
    assert!(failed.contains(&ShardId::new("..", 0)), "failed: {:?}", failed);
    assert!(failed.contains(&blocked), "failed: {:?}", failed);
    assert_eq!(failed.len(), 2);
    assert_eq!(report.deleted, vec![healthy.clone()]);
    assert!(!node.env.shard_exists(&healthy));
    assert!(location.is_file());
}

#[test]
fn open_index_deletes_through_its_store() {
    let node = TestNode::new();
    let service = Arc::new(LocalIndexService::new("logs", Arc::clone(&node.env)));
    service.add_shard(1);
    node.indices.register(service.clone());

    let unheld = node.write_shard("logs", 0);
    let held = node.write_shard("logs", 1);

    let rt = routing(
        1,
        vec![
            ("logs", 0, vec![started("logs", 0, "node2", true)]),
            ("logs", 1, vec![started("logs", 1, "node2", true)]),
        ],
    );
    let report = node.publish(rt);

    assert_eq!(report.deleted, vec![unheld.clone()]);
    assert_eq!(report.still_allocated, vec![held.clone()]);
    assert!(!node.env.shard_exists(&unheld));
    assert!(node.env.shard_exists(&held));
}

#[test]
fn disabled_environment_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let populated = NodeEnvironment::open(&[dir.path().to_path_buf()]).unwrap();
    let shard = ShardId::new("logs", 0);
    for location in populated.shard_locations(&shard).unwrap() {
        std::fs::create_dir_all(location).unwrap();
    }

    let cluster = ClusterService::new(ClusterState::initial(LOCAL));
    let reaper = ShardReaper::new(
        Arc::new(NodeEnvironment::disabled()),
        Arc::new(IndicesService::new()),
    );
    let rt = routing(1, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    let event = cluster.publish("test", ClusterState::new(1, LOCAL, rt, ClusterBlocks::empty()));

    let report = reaper.reap(&event);
    assert_eq!(report.deletable, 1);
    assert!(report.deleted.is_empty());
    assert!(populated.shard_exists(&shard));
}

#[test]
fn started_store_reaps_on_publish_until_stopped() {
    let node = TestNode::new();
    let settings = Arc::new(NodeSettingsService::new(Settings::empty()));
    let store = IndicesStore::new(
        &Settings::empty(),
        Arc::clone(&node.env),
        Arc::clone(&node.indices),
        Arc::clone(&node.cluster),
        Arc::clone(&settings),
    )
    .unwrap();
    store.start().unwrap();

    let first = node.write_shard("logs", 0);
    let rt = routing(1, vec![("logs", 0, vec![started("logs", 0, "node2", true)])]);
    node.cluster
        .publish("test", ClusterState::new(1, LOCAL, rt, ClusterBlocks::empty()));
    assert!(!node.env.shard_exists(&first));

    store.stop().unwrap();

    let second = node.write_shard("logs", 1);
    let rt = routing(2, vec![("logs", 1, vec![started("logs", 1, "node2", true)])]);
    node.cluster
        .publish("test", ClusterState::new(2, LOCAL, rt, ClusterBlocks::empty()));
    assert!(node.env.shard_exists(&second));
}
