//! Path-keyed accessor tree over one namespace
//!
//! A `StoreRoot` owns a namespace and its default value; `Node`s are cheap
//! path-scoped handles built from it with `at`/`index`. Every sub-path is
//! observable on its own.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::hooks::ObjectWatch;
use crate::path::{get_nested_value, join};
use crate::store::{Store, Subscription};
use crate::value::snapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Keep every write out of persistence and off the bus
    pub memory_only: bool,
}

#[derive(Clone)]
pub struct StoreRoot {
    store: Arc<Store>,
    namespace: Arc<str>,
    default: Arc<Value>,
    options: StoreOptions,
}

impl StoreRoot {
    /// Bind `namespace`, seeding `default` silently when it holds nothing yet
    pub fn new(
        store: Arc<Store>,
        namespace: impl Into<String>,
        default: Value,
        options: StoreOptions,
    ) -> Self {
        let namespace: String = namespace.into();

        if store.get_snapshot(&namespace).is_none() {
            store.produce(&namespace, Some(default.clone()), true, options.memory_only);
        }

        Self {
            store,
            namespace: namespace.into(),
            default: Arc::new(default),
            options,
        }
    }

    /// Component-local store: a fresh `memory:<id>` namespace that is never
    /// persisted or broadcast
    pub fn memory(store: Arc<Store>, default: Value) -> Self {
        let namespace = format!("memory:{}", Uuid::new_v4().simple());
        Self::new(store, namespace, default, StoreOptions { memory_only: true })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Full key of `path` inside this namespace
    pub fn key(&self, path: &str) -> String {
        join(&self.namespace, path)
    }

    pub fn node(&self, path: &str) -> Node {
        Node {
            root: self.clone(),
            path: path.to_string(),
        }
    }

    pub fn value(&self, path: &str) -> Option<Value> {
        self.store.get_snapshot(&self.key(path))
    }

    /// Write at `path`; `None` deletes
    pub fn set(&self, path: &str, value: Option<Value>) {
        self.store
            .set_leaf(&self.namespace, path, value, false, self.options.memory_only);
    }

    /// Restore `path` to what the default value holds there
    pub fn reset(&self, path: &str) {
        let default = get_nested_value(Some(&self.default), path).map(|v| snapshot(Some(v)));
        self.set(path, default);
    }

    /// Call `listener` with the value at `path` each time it is notified
    pub fn subscribe<F>(&self, path: &str, listener: F) -> Subscription
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        let key = self.key(path);
        let weak = Arc::downgrade(&self.store);
        let listener_key = key.clone();
        self.store.subscribe(&key, move || {
            if let Some(store) = weak.upgrade() {
                listener(store.get_snapshot(&listener_key));
            }
        })
    }

    /// Fire the listeners of `path` and its root key without writing
    pub fn notify(&self, path: &str) -> usize {
        let key = self.key(path);
        let current = self.store.get_snapshot(&key);
        self.store
            .notify(&key, current.as_ref(), current.as_ref(), false, false)
    }

    pub fn watch(&self, path: &str) -> ObjectWatch {
        self.store.watch(&self.namespace, path)
    }
}

impl std::fmt::Debug for StoreRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRoot")
            .field("namespace", &self.namespace)
            .field("options", &self.options)
            .finish()
    }
}

/// Accessor for one path inside a `StoreRoot`
#[derive(Clone, Debug)]
pub struct Node {
    root: StoreRoot,
    path: String,
}

impl Node {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> String {
        self.root.key(&self.path)
    }

    pub fn root(&self) -> &StoreRoot {
        &self.root
    }

    /// Child accessor for `segment` (an object key or a decimal index)
    pub fn at(&self, segment: &str) -> Node {
        Node {
            root: self.root.clone(),
            path: join_path(&self.path, segment),
        }
    }

    pub fn index(&self, index: usize) -> Node {
        self.at(&index.to_string())
    }

    pub fn value(&self) -> Option<Value> {
        self.root.value(&self.path)
    }

    /// Value deserialized into `T`; `None` when nothing is stored
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.value()
            .map(|value| {
                serde_json::from_value(value)
                    .with_context(|| format!("Unexpected shape at {}", self.key()))
            })
            .transpose()
    }

    pub fn set(&self, value: Value) {
        self.root.set(&self.path, Some(value));
    }

    pub fn set_as<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to serialize value for {}", self.key()))?;
        self.set(value);
        Ok(())
    }

    pub fn delete(&self) {
        self.root.set(&self.path, None);
    }

    pub fn reset(&self) {
        self.root.reset(&self.path);
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.root.subscribe(&self.path, listener)
    }

    pub fn watch(&self) -> ObjectWatch {
        self.root.watch(&self.path)
    }

    pub fn notify(&self) -> usize {
        self.root.notify(&self.path)
    }

    /// Array length, zero for anything that is not an array
    pub fn len(&self) -> usize {
        match self.value() {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to the array here, starting a new one if there is none
    pub fn push(&self, item: Value) {
        let mut items = match self.value() {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        items.push(item);
        self.set(Value::Array(items));
    }

    /// Splice out `index`, shifting later elements down
    pub fn remove(&self, index: usize) -> Option<Value> {
        let child = self.index(index);
        let removed = child.value()?;
        child.delete();
        Some(removed)
    }
}

fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        return segment.to_string();
    }
    format!("{}.{}", path, segment)
}
