use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const STORE_DIR: &str = ".juststore";
pub const CONFIG_FILE: &str = "config.json";

/// Store configuration, read from `.juststore/config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Origin that scopes persisted records
    pub origin: String,

    /// Directory holding per-origin databases
    pub data_dir: PathBuf,

    /// Broadcast channel name shared by every context of the origin
    pub channel: String,

    /// Persist non-memory-only namespaces
    pub persist: bool,

    /// Buffered messages per in-process broadcast receiver
    pub bus_capacity: usize,

    /// Default delay for debounced watches
    pub debounce_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            data_dir: PathBuf::from(STORE_DIR),
            channel: "juststore-producer-consumer".to_string(),
            persist: true,
            bus_capacity: 1024,
            debounce_ms: 300,
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Database file for this origin
    pub fn db_path(&self) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.origin.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.data_dir.join(format!("origin-{}.db", &digest[..16]))
    }

    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }
}

/// Create the store directory with a default config, keeping an existing one
pub async fn init(path: &Path) -> Result<StoreConfig> {
    let store_path = path.join(STORE_DIR);
    tokio::fs::create_dir_all(&store_path).await?;

    let config_path = store_path.join(CONFIG_FILE);
    if config_path.exists() {
        return StoreConfig::load(&config_path);
    }

    let config = StoreConfig {
        data_dir: store_path,
        ..Default::default()
    };
    tokio::fs::write(&config_path, serde_json::to_string_pretty(&config)?).await?;

    Ok(config)
}
