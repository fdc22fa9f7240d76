//! Cluster state source
//!
//! `publish` swaps in a new snapshot and hands the resulting
//! `ClusterChangedEvent` to every listener, one event at a time.

use parking_lot::{Mutex, RwLock};
use shardkeep_core::{ClusterChangedEvent, ClusterState, ListenerRegistry, Subscription};
use std::sync::Arc;
use tracing::{debug, trace};

/// Receives cluster change events
pub trait ClusterStateListener: Send + Sync {
    /// Called once per published state, in publish order
    fn cluster_changed(&self, event: &ClusterChangedEvent);
}

/// Holds the latest cluster snapshot and notifies listeners of changes
pub struct ClusterService {
    /// Latest snapshot
    state: RwLock<Arc<ClusterState>>,
    /// Registered listeners
    listeners: ListenerRegistry<dyn ClusterStateListener>,
    /// Serializes publish so events keep arrival order
    delivery: Mutex<()>,
}

impl ClusterService {
    /// Create a service starting from `initial`
    pub fn new(initial: ClusterState) -> Self {
        Self {
            state: RwLock::new(Arc::new(initial)),
            listeners: ListenerRegistry::new(),
            delivery: Mutex::new(()),
        }
    }

    /// Latest snapshot
    pub fn state(&self) -> Arc<ClusterState> {
        self.state.read().clone()
    }

    /// Id of the local node
    pub fn local_node_id(&self) -> String {
        self.state.read().local_node_id.clone()
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn ClusterStateListener>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Replace the current snapshot and notify listeners.
    ///
    /// Returns the delivered event.
    pub fn publish(&self, source: &str, new_state: ClusterState) -> ClusterChangedEvent {
        let _delivery = self.delivery.lock();

        let new_state = Arc::new(new_state);
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, Arc::clone(&new_state))
        };

        let event = ClusterChangedEvent::new(source, new_state, previous);
        debug!(
            "cluster state [{}] -> [{}] from [{}], routing_table_changed={}",
            event.previous_state.version,
            event.state.version,
            source,
            event.routing_table_changed()
        );

        for listener in self.listeners.snapshot() {
            trace!("delivering cluster state [{}]", event.state.version);
            listener.cluster_changed(&event);
        }

        event
    }
}
