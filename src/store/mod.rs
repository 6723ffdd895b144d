//! Reactive store façade
//!
//! `produce` is the single mutation entry point: it writes through the
//! backing store and then runs the notification engine. Consumers re-read
//! through `get_snapshot` from inside their listeners.

pub mod backing;
pub mod listeners;

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::StoreConfig;
use crate::path::join;
use crate::storage::{self, Persistence};
use crate::sync::{ChangeMessage, MessageBus, NoopBus};

pub use backing::BackingStore;
pub use listeners::{Listener, ListenerRegistry, Subscription};

pub struct Store {
    backing: BackingStore,
    listeners: Arc<ListenerRegistry>,
    // Serialises read-modify-write; never held while listeners run
    write_gate: Mutex<()>,
}

/// Wires a `Store` to its persistence and bus collaborators
#[derive(Default)]
pub struct StoreBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    bus: Option<Arc<dyn MessageBus>>,
}

impl StoreBuilder {
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Arc<Store> {
        let bus = self.bus.unwrap_or_else(|| Arc::new(NoopBus));

        let store = Arc::new(Store {
            backing: BackingStore::new(self.persistence, bus.clone()),
            listeners: ListenerRegistry::new(),
            write_gate: Mutex::new(()),
        });

        let weak = Arc::downgrade(&store);
        bus.on_message(Box::new(move |message| {
            if let Some(store) = weak.upgrade() {
                store.apply_message(&message);
            }
        }));

        store
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Memory-only store: no persistence, no cross-context bus
    pub fn in_memory() -> Arc<Self> {
        Self::builder().build()
    }

    /// Production wiring: SQLite persistence for the configured origin
    pub fn from_config(config: &StoreConfig, bus: Arc<dyn MessageBus>) -> Result<Arc<Self>> {
        let mut builder = Self::builder().bus(bus);
        if let Some(persistence) = storage::open(config)? {
            builder = builder.persistence(persistence);
        }
        Ok(builder.build())
    }

    /// Current value at `key` (`namespace[.path]`)
    pub fn get_snapshot(&self, key: &str) -> Option<Value> {
        self.backing.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.backing.has(key)
    }

    /// Write `value` at `key` and notify
    ///
    /// `None` deletes. Writing a value deep-equal to the current one, or
    /// deleting something already absent, changes nothing and notifies
    /// nobody. `skip_update` suppresses notification; `memory_only` keeps the
    /// write out of persistence and off the bus.
    pub fn produce(&self, key: &str, value: Option<Value>, skip_update: bool, memory_only: bool) {
        let current = {
            let _gate = self.write_gate.lock();
            let current = self.backing.get(key);

            match &value {
                None => {
                    if current.is_none() {
                        return;
                    }
                    self.backing.delete(key, memory_only);
                }
                Some(v) => {
                    if current.as_ref() == Some(v) {
                        return;
                    }
                    if !self.backing.set(key, Some(v.clone()), memory_only) {
                        return;
                    }
                }
            }
            current
        };

        if skip_update {
            return;
        }

        self.listeners
            .notify(key, current.as_ref(), value.as_ref(), false, false);
    }

    /// `produce(join(namespace, path), ..)`
    pub fn set_leaf(
        &self,
        namespace: &str,
        path: &str,
        value: Option<Value>,
        skip_update: bool,
        memory_only: bool,
    ) {
        self.produce(&join(namespace, path), value, skip_update, memory_only);
    }

    /// Register a zero-argument listener at the exact `key`
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.subscribe(key, Arc::new(listener))
    }

    /// Run the notification engine for a change at `key`
    pub fn notify(
        &self,
        key: &str,
        old: Option<&Value>,
        new: Option<&Value>,
        skip_root: bool,
        skip_children: bool,
    ) -> usize {
        self.listeners.notify(key, old, new, skip_root, skip_children)
    }

    /// Apply a change published by another context
    ///
    /// The previous in-memory root is captured, the change applied to memory
    /// only, and listeners at the namespace or below it fire when the value
    /// they address differs.
    pub fn apply_message(&self, message: &ChangeMessage) -> usize {
        let key = message.key();
        if key.is_empty() {
            tracing::debug!("ignoring change message without key");
            return 0;
        }

        let (old, new) = {
            let _gate = self.write_gate.lock();
            let old = self.backing.apply_remote(message);
            (old, self.backing.resident(key))
        };

        if old == new {
            return 0;
        }

        let fired = self
            .listeners
            .notify(key, old.as_deref(), new.as_deref(), false, false);
        tracing::debug!(namespace = key, fired, "applied remote change");
        fired
    }

    /// Number of namespaces resident in memory
    pub fn size(&self) -> usize {
        self.backing.size()
    }

    /// Number of paths with listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.backing.namespaces()
    }

    #[cfg(debug_assertions)]
    pub fn debug_handle(self: &Arc<Self>) -> DebugHandle {
        DebugHandle {
            store: Arc::clone(self),
        }
    }
}

/// Introspection for development builds
#[cfg(debug_assertions)]
pub struct DebugHandle {
    store: Arc<Store>,
}

#[cfg(debug_assertions)]
impl DebugHandle {
    pub fn store_size(&self) -> usize {
        self.store.size()
    }

    pub fn listener_size(&self) -> usize {
        self.store.listeners.len()
    }

    pub fn listener_keys(&self) -> Vec<String> {
        self.store.listeners.keys()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.store.namespaces()
    }

    /// Raw resident root, bypassing hydration
    pub fn store_value(&self, namespace: &str) -> Option<Value> {
        self.store
            .backing
            .resident(namespace)
            .map(|value| (*value).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hits(store: &Store, key: &str) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = store.subscribe(key, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_produce_is_idempotent() {
        let store = Store::in_memory();
        let (count, _sub) = hits(&store, "ns.a");

        store.produce("ns.a", Some(json!({"x": 1})), false, false);
        store.produce("ns.a", Some(json!({"x": 1})), false, false);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_delete_is_noop() {
        let store = Store::in_memory();
        store.produce("ns.a", Some(json!(1)), false, false);
        let (count, _sub) = hits(&store, "ns.a");

        store.produce("ns.a", None, false, false);
        store.produce("ns.a", None, false, false);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_snapshot("ns.a"), None);
    }

    #[test]
    fn test_skip_update_writes_silently() {
        let store = Store::in_memory();
        let (count, _sub) = hits(&store, "ns.a");

        store.produce("ns.a", Some(json!(1)), true, false);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(store.get_snapshot("ns.a"), Some(json!(1)));
    }

    #[test]
    fn test_listener_may_write_reentrantly() {
        let store = Store::in_memory();
        let weak = Arc::downgrade(&store);
        let _mirror = store.subscribe("ns.src", move || {
            if let Some(store) = weak.upgrade() {
                let v = store.get_snapshot("ns.src");
                store.produce("mirror.copy", v, false, false);
            }
        });

        store.produce("ns.src", Some(json!("hello")), false, false);
        assert_eq!(store.get_snapshot("mirror.copy"), Some(json!("hello")));
    }

    #[test]
    fn test_apply_message_ignores_missing_key() {
        let store = Store::in_memory();
        let msg: ChangeMessage = serde_json::from_value(json!({"type": "delete"})).unwrap();
        assert_eq!(store.apply_message(&msg), 0);
        assert_eq!(store.size(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_debug_handle() {
        let store = Store::in_memory();
        store.produce("cfg.a", Some(json!(1)), false, false);
        let _sub = store.subscribe("cfg.a", || {});

        let debug = store.debug_handle();
        assert_eq!(debug.store_size(), 1);
        assert_eq!(debug.listener_size(), 1);
        assert_eq!(debug.listener_keys(), vec!["cfg.a"]);
        assert_eq!(debug.store_value("cfg"), Some(json!({"a": 1})));
    }
}
