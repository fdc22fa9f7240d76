//! Node-level store component
//!
//! Owns the shard reaper and the throttle controller and keeps them
//! subscribed to cluster changes and settings refreshes between `start`
//! and `stop`.

use crate::env::NodeEnvironment;
use crate::error::{Result, StoreError};
use crate::indices::IndicesService;
use crate::rate_limit::StoreRateLimiting;
use crate::reaper::ShardReaper;
use crate::throttle::ThrottleController;
use parking_lot::Mutex;
use shardkeep_cluster::ClusterService;
use shardkeep_core::Subscription;
use shardkeep_settings::{NodeSettingsService, Settings};
use std::sync::Arc;
use tracing::info;

struct Subscriptions {
    settings: Subscription,
    cluster: Subscription,
}

/// Unused shard cleanup and store throttling for one node
pub struct IndicesStore {
    cluster_service: Arc<ClusterService>,
    settings_service: Arc<NodeSettingsService>,
    reaper: Arc<ShardReaper>,
    throttle: Arc<ThrottleController>,
    subscriptions: Mutex<Option<Subscriptions>>,
}

impl IndicesStore {
    /// Build the component; throttling is initialized from `node_settings`
    pub fn new(
        node_settings: &Settings,
        node_env: Arc<NodeEnvironment>,
        indices_service: Arc<IndicesService>,
        cluster_service: Arc<ClusterService>,
        settings_service: Arc<NodeSettingsService>,
    ) -> Result<Self> {
        let rate_limiting = Arc::new(StoreRateLimiting::new());
        let throttle = Arc::new(ThrottleController::new(node_settings, rate_limiting)?);
        let reaper = Arc::new(ShardReaper::new(node_env, indices_service));

        Ok(Self {
            cluster_service,
            settings_service,
            reaper,
            throttle,
            subscriptions: Mutex::new(None),
        })
    }

    /// Subscribe to settings refreshes and cluster changes
    pub fn start(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.is_some() {
            return Err(StoreError::Lifecycle("indices store already started".to_string()));
        }

        let settings = self.settings_service.add_listener(self.throttle.clone());
        let cluster = self.cluster_service.add_listener(self.reaper.clone());
        *subscriptions = Some(Subscriptions { settings, cluster });

        info!("indices store started");
        Ok(())
    }

    /// Unsubscribe from both sources. A delivery already in progress may
    /// still finish.
    pub fn stop(&self) -> Result<()> {
        let subscriptions = self
            .subscriptions
            .lock()
            .take()
            .ok_or_else(|| StoreError::Lifecycle("indices store not started".to_string()))?;

        subscriptions.cluster.cancel();
        subscriptions.settings.cancel();

        info!("indices store stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.subscriptions.lock().is_some()
    }

    /// Shared rate limiter read by store writers
    pub fn rate_limiting(&self) -> Arc<StoreRateLimiting> {
        Arc::clone(self.throttle.rate_limiting())
    }

    pub fn reaper(&self) -> &Arc<ShardReaper> {
        &self.reaper
    }

    pub fn throttle(&self) -> &Arc<ThrottleController> {
        &self.throttle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkeep_core::ClusterState;

    fn store() -> (IndicesStore, Arc<ClusterService>, Arc<NodeSettingsService>) {
        let cluster = Arc::new(ClusterService::new(ClusterState::initial("node1")));
        let settings = Arc::new(NodeSettingsService::new(Settings::empty()));
        let store = IndicesStore::new(
            &Settings::empty(),
            Arc::new(NodeEnvironment::disabled()),
            Arc::new(IndicesService::new()),
            cluster.clone(),
            settings.clone(),
        )
        .unwrap();
        (store, cluster, settings)
    }

    #[test]
    fn test_start_stop_subscriptions() {
        let (store, cluster, settings) = store();
        assert!(!store.is_started());

        store.start().unwrap();
        assert!(store.is_started());
        assert_eq!(cluster.listener_count(), 1);
        assert_eq!(settings.listener_count(), 1);

        store.stop().unwrap();
        assert!(!store.is_started());
        assert_eq!(cluster.listener_count(), 0);
        assert_eq!(settings.listener_count(), 0);
    }

    #[test]
    fn test_lifecycle_misuse() {
        let (store, _cluster, _settings) = store();
        assert!(matches!(store.stop(), Err(StoreError::Lifecycle(_))));

        store.start().unwrap();
        assert!(matches!(store.start(), Err(StoreError::Lifecycle(_))));

        store.stop().unwrap();
        assert!(matches!(store.stop(), Err(StoreError::Lifecycle(_))));

        // Restart after stop
        store.start().unwrap();
        store.stop().unwrap();
    }
}
