//! Node wiring
//!
//! Builds the services from `NodeConfig`, mirrors local shard allocation
//! into open indices, and feeds file-based routing and settings into the
//! cluster and settings services.

use crate::config::NodeConfig;
use anyhow::Context;
use parking_lot::Mutex;
use shardkeep_cluster::{ClusterService, ClusterStateListener, RoutingConfig};
use shardkeep_core::{ClusterChangedEvent, ClusterState, Subscription};
use shardkeep_settings::{NodeSettingsService, Settings};
use shardkeep_store::{
    IndicesService, IndicesStore, LocalIndexService, NodeEnvironment, StoreRateLimiting,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Opens an index for every shard routed to this node and closes indices
/// left with none
pub struct LocalAllocations {
    node_env: Arc<NodeEnvironment>,
    indices_service: Arc<IndicesService>,
    opened: Mutex<HashMap<String, Arc<LocalIndexService>>>,
}

impl LocalAllocations {
    pub fn new(node_env: Arc<NodeEnvironment>, indices_service: Arc<IndicesService>) -> Self {
        Self {
            node_env,
            indices_service,
            opened: Mutex::new(HashMap::new()),
        }
    }

    fn sync(&self, state: &ClusterState) {
        let local = state.local_node_id.as_str();
        let mut wanted: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for index_table in state.routing_table.iter() {
            for group in index_table.iter() {
                if group.references_node(local) {
                    wanted
                        .entry(index_table.index.clone())
                        .or_default()
                        .insert(group.shard_id.id);
                }
            }
        }

        let mut opened = self.opened.lock();

        opened.retain(|index, service| {
            let Some(shards) = wanted.get(index) else {
                self.indices_service.remove(index);
                return false;
            };
            for id in service.shard_ids() {
                if !shards.contains(&id) {
                    debug!("[{}][{}] released by this node", index, id);
                    service.remove_shard(id);
                }
            }
            true
        });

        for (index, shards) in wanted {
            let service = opened.entry(index.clone()).or_insert_with(|| {
                let service = Arc::new(LocalIndexService::new(
                    index.clone(),
                    Arc::clone(&self.node_env),
                ));
                self.indices_service.register(service.clone());
                service
            });
            for id in shards {
                if service.add_shard(id) {
                    debug!("[{}][{}] allocated to this node", index, id);
                }
            }
        }
    }
}

impl ClusterStateListener for LocalAllocations {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        if event.routing_table_changed() {
            self.sync(&event.state);
        }
    }
}

/// A running node
pub struct Node {
    config: NodeConfig,
    base_settings: Settings,
    indices_service: Arc<IndicesService>,
    cluster_service: Arc<ClusterService>,
    settings_service: Arc<NodeSettingsService>,
    allocations: Arc<LocalAllocations>,
    allocations_subscription: Mutex<Option<Subscription>>,
    indices_store: IndicesStore,
}

impl Node {
    pub fn build(config: NodeConfig) -> anyhow::Result<Self> {
        let node_env = if config.node.data_paths.is_empty() {
            info!("no data paths configured, shard data cleanup disabled");
            Arc::new(NodeEnvironment::disabled())
        } else {
            Arc::new(
                NodeEnvironment::open(&config.node.data_paths)
                    .context("Failed to open node environment")?,
            )
        };

        let base_settings = config.node_settings();
        let indices_service = Arc::new(IndicesService::new());
        let cluster_service = Arc::new(ClusterService::new(ClusterState::initial(
            config.node.id.clone(),
        )));
        let settings_service = Arc::new(NodeSettingsService::new(base_settings.clone()));
        let allocations = Arc::new(LocalAllocations::new(
            Arc::clone(&node_env),
            Arc::clone(&indices_service),
        ));

        let indices_store = IndicesStore::new(
            &base_settings,
            node_env,
            Arc::clone(&indices_service),
            Arc::clone(&cluster_service),
            Arc::clone(&settings_service),
        )
        .context("Invalid store settings")?;

        Ok(Self {
            config,
            base_settings,
            indices_service,
            cluster_service,
            settings_service,
            allocations,
            allocations_subscription: Mutex::new(None),
            indices_store,
        })
    }

    /// Subscribe everything. Allocation tracking runs ahead of cleanup.
    pub fn start(&self) -> anyhow::Result<()> {
        let subscription = self.cluster_service.add_listener(self.allocations.clone());
        if let Err(e) = self.indices_store.start() {
            subscription.cancel();
            return Err(e.into());
        }
        *self.allocations_subscription.lock() = Some(subscription);
        info!("node [{}] started", self.config.node.id);
        Ok(())
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.indices_store.stop()?;
        if let Some(subscription) = self.allocations_subscription.lock().take() {
            subscription.cancel();
        }
        info!("node [{}] stopped", self.config.node.id);
        Ok(())
    }

    /// Re-read the routing file and publish it if it differs from the
    /// current view. Returns whether a state was published.
    pub fn reload_routing(&self) -> anyhow::Result<bool> {
        let Some(path) = &self.config.cluster.routing_file else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let routing = RoutingConfig::from_file(path)?;
        let current = self.cluster_service.state();
        let next = routing.to_cluster_state(&current.local_node_id, current.version + 1)?;
        if *next.routing_table == *current.routing_table && next.blocks == current.blocks {
            return Ok(false);
        }

        self.cluster_service
            .publish(&format!("routing file {}", path.display()), next);
        Ok(true)
    }

    /// Re-read the settings file, layer it over the startup settings and
    /// refresh listeners if the result changed. Returns whether a refresh
    /// was delivered.
    pub fn reload_settings(&self) -> anyhow::Result<bool> {
        let Some(path) = &self.config.settings.file else {
            return Ok(false);
        };
        let overrides = if path.exists() {
            Settings::from_yaml_file(path)?
        } else {
            Settings::empty()
        };

        let next = self.base_settings.merged_with(&overrides);
        if next == *self.settings_service.settings() {
            return Ok(false);
        }

        self.settings_service.refresh(next)?;
        Ok(true)
    }

    pub fn rate_limiting(&self) -> Arc<StoreRateLimiting> {
        self.indices_store.rate_limiting()
    }

    pub fn indices_service(&self) -> &Arc<IndicesService> {
        &self.indices_service
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
