use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use super::Persistence;

/// SQLite-backed per-origin record table
pub struct Database {
    pub conn: Arc<Mutex<Connection>>,
    origin: String,
}

impl Database {
    pub fn new(db_path: &Path, origin: impl Into<String>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            origin: origin.into(),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                origin TEXT NOT NULL,
                namespace TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (origin, namespace)
            )",
            [],
        )?;

        Ok(())
    }
}

impl Persistence for Database {
    fn get(&self, namespace: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE origin = ?1 AND namespace = ?2",
                params![self.origin, namespace],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    fn set(&self, namespace: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO records (origin, namespace, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(origin, namespace) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![self.origin, namespace, value, chrono::Utc::now().to_rfc3339()],
        )?;

        Ok(())
    }

    fn delete(&self, namespace: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM records WHERE origin = ?1 AND namespace = ?2",
            params![self.origin, namespace],
        )?;
        Ok(())
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT namespace FROM records WHERE origin = ?1 ORDER BY namespace")?;
        let names = stmt.query_map(params![self.origin], |row| row.get::<_, String>(0))?;

        Ok(names.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_are_scoped_per_origin() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");

        let a = Database::new(&path, "https://a.example").unwrap();
        a.initialize().unwrap();
        let b = Database::new(&path, "https://b.example").unwrap();
        b.initialize().unwrap();

        a.set("cfg", r#"{"x":1}"#).unwrap();
        assert_eq!(a.get("cfg").unwrap().as_deref(), Some(r#"{"x":1}"#));
        assert_eq!(b.get("cfg").unwrap(), None);

        a.set("cfg", r#"{"x":2}"#).unwrap();
        assert_eq!(a.get("cfg").unwrap().as_deref(), Some(r#"{"x":2}"#));
        assert_eq!(a.namespaces().unwrap(), vec!["cfg"]);

        a.delete("cfg").unwrap();
        assert_eq!(a.get("cfg").unwrap(), None);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/store.db");

        {
            let db = Database::new(&path, "origin").unwrap();
            db.initialize().unwrap();
            db.set("home", "[1,2]").unwrap();
        }

        let db = Database::new(&path, "origin").unwrap();
        db.initialize().unwrap();
        assert_eq!(db.get("home").unwrap().as_deref(), Some("[1,2]"));
    }
}
