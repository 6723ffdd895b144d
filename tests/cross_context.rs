use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use juststore::config::StoreConfig;
use juststore::{BroadcastHub, MemoryPersistence, NoopBus, Persistence, Store};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

/// Poll until `check` holds or a second has passed
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    timeout(Duration::from_secs(1), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn tabs_mirror_each_other_through_hub() {
    let hub = BroadcastHub::new("tabs", 64);
    let persistence = Arc::new(MemoryPersistence::new());

    let tab_a = Store::builder()
        .persistence(persistence.clone())
        .bus(hub.endpoint())
        .build();
    let tab_b = Store::builder()
        .persistence(persistence.clone())
        .bus(hub.endpoint())
        .build();

    let mut watch_b = tab_b.watch("cfg", "theme");

    tab_a.set_leaf("cfg", "theme", Some(json!("dark")), false, false);

    let seen = timeout(Duration::from_secs(1), watch_b.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, Some(json!("dark")));
    assert_eq!(tab_b.get_snapshot("cfg"), tab_a.get_snapshot("cfg"));

    tab_b.produce("cfg", None, false, false);
    assert!(eventually(|| tab_a.get_snapshot("cfg").is_none()).await);
    assert_eq!(persistence.get("cfg").unwrap(), None);
}

#[tokio::test]
async fn memory_only_writes_do_not_cross_tabs() {
    let hub = BroadcastHub::new("tabs", 64);
    let tab_a = Store::builder().bus(hub.endpoint()).build();
    let tab_b = Store::builder().bus(hub.endpoint()).build();

    tab_a.produce("draft.body", Some(json!("secret")), false, true);
    tab_a.produce("shared.body", Some(json!("public")), false, false);

    assert!(eventually(|| tab_b.get_snapshot("shared.body").is_some()).await);
    assert_eq!(tab_b.get_snapshot("draft.body"), None);
}

#[tokio::test]
async fn last_whole_root_wins() {
    let hub = BroadcastHub::new("tabs", 64);
    let tab_a = Store::builder().bus(hub.endpoint()).build();
    let tab_b = Store::builder().bus(hub.endpoint()).build();

    // Concurrent edits to different fields of one namespace
    tab_a.produce("doc.title", Some(json!("A")), false, false);
    tab_b.produce("doc.body", Some(json!("B")), false, false);

    assert!(eventually(|| tab_a.get_snapshot("doc") == Some(json!({"body": "B"}))).await);
    assert!(eventually(|| tab_b.get_snapshot("doc") == Some(json!({"title": "A"}))).await);
}

#[tokio::test]
async fn dropped_store_leaves_the_hub() {
    let hub = BroadcastHub::new("tabs", 64);
    let tab_a = Store::builder().bus(hub.endpoint()).build();
    let tab_b = Store::builder().bus(hub.endpoint()).build();
    assert_eq!(hub.receiver_count(), 2);

    drop(tab_b);
    assert!(eventually(|| hub.receiver_count() == 1).await);

    tab_a.produce("cfg.theme", Some(json!("dark")), false, false);
    assert_eq!(tab_a.get_snapshot("cfg.theme"), Some(json!("dark")));
}

struct FailingPersistence;

impl Persistence for FailingPersistence {
    fn get(&self, _namespace: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _namespace: &str, _value: &str) -> Result<()> {
        Err(anyhow!("quota exceeded"))
    }

    fn delete(&self, _namespace: &str) -> Result<()> {
        Err(anyhow!("storage disabled"))
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[test]
fn persistence_failures_are_not_fatal() {
    let store = Store::builder()
        .persistence(Arc::new(FailingPersistence))
        .build();

    let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let h = hits.clone();
    let _sub = store.subscribe("ns.a", move || {
        h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    store.produce("ns.a", Some(json!(1)), false, false);
    assert_eq!(store.get_snapshot("ns.a"), Some(json!(1)));

    store.produce("ns", None, false, false);
    assert_eq!(store.get_snapshot("ns"), None);
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[test]
fn sqlite_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig {
        data_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };

    {
        let store = Store::from_config(&config, Arc::new(NoopBus)).unwrap();
        store.set_leaf("home", "items.0", Some(json!("first")), false, false);
        store.set_leaf("form:x", "name", Some(json!("ephemeral")), false, true);
    }

    let reopened = Store::from_config(&config, Arc::new(NoopBus)).unwrap();
    assert_eq!(reopened.size(), 0);
    assert_eq!(reopened.get_snapshot("home.items"), Some(json!(["first"])));
    assert_eq!(reopened.get_snapshot("form:x"), None);

    let other_origin = StoreConfig {
        origin: "https://elsewhere.example".into(),
        ..config
    };
    let isolated = Store::from_config(&other_origin, Arc::new(NoopBus)).unwrap();
    assert_eq!(isolated.get_snapshot("home"), None);
}
