pub mod db;

use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;

use crate::config::StoreConfig;

pub use db::Database;

/// String-keyed, string-valued record table scoped to one origin
///
/// Each record maps a root namespace to the JSON text of its root value.
pub trait Persistence: Send + Sync {
    fn get(&self, namespace: &str) -> Result<Option<String>>;

    fn set(&self, namespace: &str, value: &str) -> Result<()>;

    fn delete(&self, namespace: &str) -> Result<()>;

    /// Every namespace currently holding a record
    fn namespaces(&self) -> Result<Vec<String>>;
}

/// Persistence for `config`: its origin database, or none when disabled
pub fn open(config: &StoreConfig) -> Result<Option<Arc<dyn Persistence>>> {
    if !config.persist {
        return Ok(None);
    }

    let db = Database::new(&config.db_path(), config.origin.clone())?;
    db.initialize()?;
    tracing::debug!(origin = %config.origin, path = %config.db_path().display(), "opened store database");

    Ok(Some(Arc::new(db)))
}

/// In-process persistence, shared by every store handed the same instance
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: DashMap<String, String>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    fn get(&self, namespace: &str) -> Result<Option<String>> {
        Ok(self.records.get(namespace).map(|record| record.clone()))
    }

    fn set(&self, namespace: &str, value: &str) -> Result<()> {
        self.records.insert(namespace.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str) -> Result<()> {
        self.records.remove(namespace);
        Ok(())
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}
