//! Listener registry for notification sources
//!
//! Sources own a `ListenerRegistry` and hand out a `Subscription` per
//! registered listener. Delivery works on a snapshot of the listener list so
//! callbacks never run under the registry lock.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64) -> bool;
}

struct RegistryInner<L: ?Sized> {
    listeners: RwLock<Vec<(u64, Arc<L>)>>,
    next_id: AtomicU64,
}

impl<L: ?Sized + Send + Sync> Unsubscribe for RegistryInner<L> {
    fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

/// Ordered set of listeners of type `L`
pub struct ListenerRegistry<L: ?Sized> {
    inner: Arc<RegistryInner<L>>,
}

impl<L: ?Sized + Send + Sync + 'static> ListenerRegistry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener; it is notified after all earlier listeners
    pub fn subscribe(&self, listener: Arc<L>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));

        let inner: Arc<dyn Unsubscribe> = self.inner.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&inner),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current listeners in registration order
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized + Send + Sync + 'static> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `ListenerRegistry::subscribe`.
///
/// Dropping the handle leaves the listener registered; call `cancel`.
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unsubscribe>,
    cancelled: AtomicBool,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already removed.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.registry
            .upgrade()
            .map(|registry| registry.unsubscribe(self.id))
            .unwrap_or(false)
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
