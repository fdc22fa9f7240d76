//! Dynamic settings source

use crate::error::{Result, SettingsError};
use crate::settings::Settings;
use parking_lot::{Mutex, RwLock};
use shardkeep_core::{ListenerRegistry, Subscription};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives settings refreshes
pub trait SettingsListener: Send + Sync {
    /// Apply the refreshed settings. Keys the listener does not own must be
    /// ignored; an error rejects the listener's update and is reported to
    /// whoever triggered the refresh.
    fn on_refresh_settings(&self, settings: &Settings) -> Result<()>;
}

/// Delivers settings refreshes to listeners
pub struct NodeSettingsService {
    /// Last refreshed settings
    current: RwLock<Arc<Settings>>,
    /// Registered listeners
    listeners: ListenerRegistry<dyn SettingsListener>,
    /// Serializes refreshes
    delivery: Mutex<()>,
}

impl NodeSettingsService {
    /// Create a service seeded with the node's startup settings
    pub fn new(initial: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            listeners: ListenerRegistry::new(),
            delivery: Mutex::new(()),
        }
    }

    /// Last refreshed settings
    pub fn settings(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn SettingsListener>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `settings` to every listener in registration order.
    ///
    /// A failing listener does not stop delivery to the others; the first
    /// failure is returned once all listeners have run.
    pub fn refresh(&self, settings: Settings) -> Result<()> {
        let _delivery = self.delivery.lock();

        let settings = Arc::new(settings);
        *self.current.write() = Arc::clone(&settings);
        debug!("refreshing {} settings", settings.len());

        let mut first_error: Option<SettingsError> = None;
        for listener in self.listeners.snapshot() {
            if let Err(e) = listener.on_refresh_settings(&settings) {
                warn!("failed to refresh settings: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
