use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::path::{get_nested_value, root_listener_key};

/// Zero-argument change callback
pub type Listener = Arc<dyn Fn() + Send + Sync>;

pub type ListenerId = u64;

/// Exact subscription path -> set of listeners
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, HashMap<ListenerId, Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener` under the exact string `key`
    pub fn subscribe(self: &Arc<Self>, key: &str, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(id, listener);

        Subscription {
            registry: Arc::downgrade(self),
            key: key.to_string(),
            id,
            active: true,
        }
    }

    fn unsubscribe(&self, key: &str, id: ListenerId) {
        let mut entries = self.entries.lock();
        if let Some(set) = entries.get_mut(key) {
            set.remove(&id);
            if set.is_empty() {
                entries.remove(key);
            }
        }
    }

    /// Number of paths with at least one listener
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.entries.lock().values().map(HashMap::len).sum()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Listeners affected by a change at `key` from `old` to `new`
    ///
    /// One pass over the registry collects exact-key listeners, listeners on
    /// the two-segment root key, and descendant listeners whose addressed
    /// sub-value differs. The result is ordered by registration, and a
    /// callback reachable through several matches appears once.
    pub fn collect(
        &self,
        key: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        skip_root: bool,
        skip_children: bool,
    ) -> Vec<Listener> {
        let root_key = (!skip_root).then(|| root_listener_key(key));
        let prefix = (!skip_children).then(|| format!("{}.", key));

        let mut matched: BTreeMap<ListenerId, Listener> = BTreeMap::new();
        let entries = self.entries.lock();

        for (listener_key, set) in entries.iter() {
            let hit = if listener_key == key || root_key == Some(listener_key.as_str()) {
                true
            } else if let Some(prefix) = prefix.as_deref() {
                match listener_key.strip_prefix(prefix) {
                    Some(child_path) => {
                        get_nested_value(old, child_path) != get_nested_value(new, child_path)
                    }
                    None => false,
                }
            } else {
                false
            };

            if hit {
                for (id, listener) in set {
                    matched.entry(*id).or_insert_with(|| listener.clone());
                }
            }
        }

        drop(entries);

        let mut seen = HashSet::new();
        matched
            .into_values()
            .filter(|listener| seen.insert(Arc::as_ptr(listener) as *const () as usize))
            .collect()
    }

    /// Invoke every affected listener exactly once
    ///
    /// The matching set is snapshotted before any callback runs, so
    /// callbacks may subscribe, unsubscribe or write freely.
    pub fn notify(
        &self,
        key: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        skip_root: bool,
        skip_children: bool,
    ) -> usize {
        let listeners = self.collect(key, old, new, skip_root, skip_children);
        let count = listeners.len();
        for listener in listeners {
            listener();
        }
        count
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    key: String,
    id: ListenerId,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener registered for the life of the store
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
