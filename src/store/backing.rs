use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::categorize_error;
use crate::path::{get_nested_value, set_nested_value, split_key};
use crate::storage::Persistence;
use crate::sync::{ChangeMessage, MessageBus};

/// In-memory root values with a persisted, broadcast mirror
///
/// Every key is decomposed into `(root namespace, sub-path)`; only whole
/// roots are held, persisted and broadcast. Memory is authoritative;
/// persistence seeds namespaces not yet resident.
pub struct BackingStore {
    memory: RwLock<HashMap<String, Arc<Value>>>,
    persistence: Option<Arc<dyn Persistence>>,
    bus: Arc<dyn MessageBus>,
}

impl BackingStore {
    pub fn new(persistence: Option<Arc<dyn Persistence>>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            persistence,
            bus,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        let (root, _) = split_key(key);
        if self.memory.read().contains_key(root) {
            return true;
        }
        self.load_persisted(root).is_some()
    }

    /// Value at `key`, hydrating its namespace from persistence on a miss
    pub fn get(&self, key: &str) -> Option<Value> {
        let (root, path) = split_key(key);
        let root_value = self.root(root)?;
        get_nested_value(Some(&*root_value), path).cloned()
    }

    /// Current root of a namespace, hydrated and cached if needed
    pub fn root(&self, namespace: &str) -> Option<Arc<Value>> {
        if let Some(value) = self.memory.read().get(namespace) {
            return Some(value.clone());
        }

        let hydrated = Arc::new(self.load_persisted(namespace)?);
        let mut memory = self.memory.write();
        // A write may have landed between the two locks; it wins
        Some(
            memory
                .entry(namespace.to_string())
                .or_insert(hydrated)
                .clone(),
        )
    }

    /// In-memory root only, no hydration
    pub fn resident(&self, namespace: &str) -> Option<Arc<Value>> {
        self.memory.read().get(namespace).cloned()
    }

    /// Write `value` at `key`. Returns false, committing nothing, when the
    /// path cannot hold the value (a named segment into an array, or an
    /// index too far past an array's end).
    pub fn set(&self, key: &str, value: Option<Value>, memory_only: bool) -> bool {
        let (root, path) = split_key(key);

        let new_root = if path.is_empty() {
            value
        } else {
            let current = self
                .root(root)
                .unwrap_or_else(|| Arc::new(Value::Object(Map::new())));
            let updated = set_nested_value(Some(&*current), path, value.clone());
            if value.is_some() && get_nested_value(updated.as_ref(), path) != value.as_ref() {
                tracing::debug!(key, "path cannot hold the value; write ignored");
                return false;
            }
            updated
        };

        self.commit(root, new_root, memory_only);
        true
    }

    pub fn delete(&self, key: &str, memory_only: bool) {
        let (root, path) = split_key(key);

        if path.is_empty() {
            self.commit(root, None, memory_only);
            return;
        }

        if let Some(current) = self.root(root) {
            let updated = set_nested_value(Some(&*current), path, None);
            self.commit(root, updated, memory_only);
        }
    }

    /// Number of namespaces resident in memory
    pub fn size(&self) -> usize {
        self.memory.read().len()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.memory.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply a change received from another context: memory only, no
    /// persistence, no re-broadcast. Returns the previous resident root.
    pub fn apply_remote(&self, message: &ChangeMessage) -> Option<Arc<Value>> {
        let mut memory = self.memory.write();
        match message {
            ChangeMessage::Set { key, value } => {
                memory.insert(key.clone(), Arc::new(value.clone()))
            }
            ChangeMessage::Delete { key } => memory.remove(key),
        }
    }

    fn commit(&self, root: &str, new_root: Option<Value>, memory_only: bool) {
        {
            let mut memory = self.memory.write();
            match &new_root {
                Some(value) => {
                    memory.insert(root.to_string(), Arc::new(value.clone()));
                }
                None => {
                    memory.remove(root);
                }
            }
        }

        if memory_only {
            return;
        }

        self.persist(root, new_root.as_ref());
        let message = match new_root {
            Some(value) => ChangeMessage::set(root, value),
            None => ChangeMessage::delete(root),
        };
        self.bus.publish(message);
    }

    fn persist(&self, root: &str, value: Option<&Value>) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let result = match value {
            Some(value) => serde_json::to_string(value)
                .map_err(anyhow::Error::from)
                .and_then(|json| persistence.set(root, &json)),
            None => persistence.delete(root),
        };

        if let Err(err) = result {
            tracing::warn!(
                namespace = root,
                category = %categorize_error(&err),
                "persisting failed; change kept in memory only: {err:#}"
            );
        }
    }

    fn load_persisted(&self, namespace: &str) -> Option<Value> {
        let persistence = self.persistence.as_ref()?;

        let raw = match persistence.get(namespace) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(
                    namespace,
                    category = %categorize_error(&err),
                    "reading persisted namespace failed: {err:#}"
                );
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(namespace, "discarding unreadable persisted namespace: {err}");
                None
            }
        }
    }
}
