use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::collections::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A save made through this process.
    Local,
    /// A difference noticed by a poller, usually written by another process.
    Poll,
}

/// Tells a subscriber which collection to re-load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub collection: Collection,
    pub origin: Origin,
}

pub type Callback = Arc<dyn Fn(&Change) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<Collection, Vec<(u64, Callback)>>>,
}

impl Registry {
    fn remove(&self, collection: Collection, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = subscribers.get_mut(&collection) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subscribers.remove(&collection);
            }
        }
    }
}

/// Publish/subscribe registry. Clones share the same subscribers.
#[derive(Clone, Default)]
pub struct Bus {
    registry: Arc<Registry>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, collection: Collection, callback: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.subscribe_arc(collection, Arc::new(callback))
    }

    pub fn subscribe_arc(&self, collection: Collection, callback: Callback) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection)
            .or_default()
            .push((id, callback));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            collection,
            id,
            active: true,
        }
    }

    /// Deliver `change` to every subscriber of its collection, in subscription
    /// order, before returning. Returns how many were notified.
    pub fn publish(&self, change: &Change) -> usize {
        // Snapshot so callbacks can subscribe, unsubscribe or load without deadlocking
        let targets: Vec<Callback> = self
            .registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&change.collection)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        tracing::debug!(collection = %change.collection, subscribers = targets.len(), "fan-out");
        for callback in &targets {
            callback(change);
        }
        targets.len()
    }

    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .map_or(0, Vec::len)
    }
}

/// Live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Registry>,
    collection: Collection,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.collection, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
