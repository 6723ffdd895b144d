//! # juststore - path-addressable reactive state
//!
//! A key-value store whose values are JSON trees addressed by dot-separated
//! paths (`namespace.a.0.b`). Any sub-path can be observed on its own:
//! writes notify exactly the listeners whose addressed value changed.
//!
//! ## Features
//!
//! - **Fine-grained notification**: exact, root and changed-descendant listeners fire once each
//! - **Per-origin persistence**: namespaces survive restarts in a SQLite record table
//! - **Cross-context sync**: every persisted write is broadcast; peers mirror it in memory
//! - **Relay service**: WebSocket fan-out for contexts living in other processes
//! - **Forms**: memory-only field state with declarative validators
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use juststore::{Store, StoreOptions, StoreRoot};
//! use serde_json::json;
//!
//! let store = Store::in_memory();
//! let cfg = StoreRoot::new(store.clone(), "cfg", json!({"providers": {"docker": {}}}), StoreOptions::default());
//!
//! let _sub = cfg.subscribe("providers", |value| println!("providers changed: {:?}", value));
//! store.set_leaf("cfg", "providers.docker.db", Some(json!("tcp://host:2375")), false, false);
//!
//! assert_eq!(cfg.value("providers.docker"), Some(json!({"db": "tcp://host:2375"})));
//! ```

pub mod config;
pub mod error;
pub mod form;
pub mod hooks;
pub mod path;
pub mod root;
pub mod server;
pub mod storage;
pub mod store;
pub mod sync;
pub mod value;

// Re-export main types for library consumers
pub use config::StoreConfig;
pub use form::{Form, FormField, FormStore, SubmitEvent, Validator};
pub use hooks::{ChangeHandle, DebouncedWatch, ObjectWatch};
pub use root::{Node, StoreOptions, StoreRoot};
pub use storage::{Database, MemoryPersistence, Persistence};
pub use store::{Store, StoreBuilder, Subscription};
pub use sync::{BroadcastHub, ChangeMessage, ChannelEndpoint, MessageBus, NoopBus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
