use std::time::Duration;

use futures::{SinkExt, StreamExt};
use juststore::config::StoreConfig;
use juststore::error::RetryPolicy;
use juststore::server::api::{router, AppState};
use juststore::sync::remote::connect_peer;
use juststore::sync::{Envelope, SyncFrame};
use juststore::{BroadcastHub, ChangeMessage, Persistence, Store};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

async fn start_relay(config: &StoreConfig) -> (AppState, String) {
    let state = AppState::new(config).expect("relay state");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let app = router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (state, format!("ws://{}/ws", addr))
}

fn relay_config(temp_dir: &TempDir) -> StoreConfig {
    StoreConfig {
        data_dir: temp_dir.path().to_path_buf(),
        channel: "relay-test".into(),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stores_sync_through_relay() {
    let temp_dir = TempDir::new().unwrap();
    let config = relay_config(&temp_dir);
    let (relay, url) = start_relay(&config).await;

    let hub_a = BroadcastHub::new(config.channel.clone(), 64);
    let tab_a = Store::builder().bus(hub_a.endpoint()).build();
    let _bridge_a = connect_peer(&url, hub_a, &RetryPolicy::default())
        .await
        .expect("peer a");

    let hub_b = BroadcastHub::new(config.channel.clone(), 64);
    let tab_b = Store::builder().bus(hub_b.endpoint()).build();
    let _bridge_b = connect_peer(&url, hub_b, &RetryPolicy::default())
        .await
        .expect("peer b");

    let mut watch_b = tab_b.watch("cfg", "theme");
    sleep(Duration::from_millis(200)).await;

    tab_a.set_leaf("cfg", "theme", Some(json!("dark")), false, false);

    let seen = timeout(Duration::from_secs(3), watch_b.changed())
        .await
        .expect("change reached tab b")
        .unwrap();
    assert_eq!(seen, Some(json!("dark")));

    // The relay mirrors and persists what it relays
    let start = std::time::Instant::now();
    while relay.store.get_snapshot("cfg.theme").is_none() && start.elapsed() < Duration::from_secs(3) {
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(relay.store.get_snapshot("cfg.theme"), Some(json!("dark")));
    let persisted = relay.persistence.as_ref().unwrap().get("cfg").unwrap();
    assert_eq!(persisted.as_deref(), Some(r#"{"theme":"dark"}"#));

    // Tab a does not apply its own change twice
    sleep(Duration::from_millis(100)).await;
    assert_eq!(tab_a.get_snapshot("cfg"), Some(json!({"theme": "dark"})));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_echoes_raw_change_frames() {
    let temp_dir = TempDir::new().unwrap();
    let config = relay_config(&temp_dir);
    let (_relay, url) = start_relay(&config).await;

    let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    let (mut write, mut read) = ws.split();

    let envelope = Envelope::new(Uuid::new_v4(), ChangeMessage::set("ns", json!([1, 2])));
    let envelope_id = envelope.id;
    let text = serde_json::to_string(&SyncFrame::change(envelope)).unwrap();
    write.send(Message::Text(text.into())).await.unwrap();

    let mut got_hello = false;
    let mut got_back = false;
    let start = std::time::Instant::now();
    while let Ok(Some(msg)) = timeout(Duration::from_secs(3), read.next()).await {
        if start.elapsed() > Duration::from_secs(3) {
            break;
        }
        if let Ok(Message::Text(t)) = msg {
            match serde_json::from_str::<SyncFrame>(t.as_str()) {
                Ok(SyncFrame::Hello { channel, .. }) => {
                    assert_eq!(channel, "relay-test");
                    got_hello = true;
                }
                Ok(SyncFrame::Change { envelope }) if envelope.id == envelope_id => {
                    got_back = true;
                    break;
                }
                _ => {}
            }
        }
    }

    assert!(got_hello, "relay did not announce itself");
    assert!(got_back, "did not get our change broadcast back");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relay_drops_peer_on_other_channel() {
    let temp_dir = TempDir::new().unwrap();
    let config = relay_config(&temp_dir);
    let (_relay, url) = start_relay(&config).await;

    let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    let (mut write, mut read) = ws.split();

    let hello = serde_json::to_string(&SyncFrame::hello(Uuid::new_v4(), "another-app")).unwrap();
    write.send(Message::Text(hello.into())).await.unwrap();

    let closed = timeout(Duration::from_secs(3), async {
        loop {
            match read.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "relay kept a peer from another channel");
}

/// Next change frame from the relay, skipping hellos
async fn next_change<S>(read: &mut S, wait: Duration) -> Option<Envelope>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    timeout(wait, async {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(t) = msg {
                if let Ok(SyncFrame::Change { envelope }) = serde_json::from_str(t.as_str()) {
                    return Some(envelope);
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_bridge_stops_forwarding() {
    let temp_dir = TempDir::new().unwrap();
    let config = relay_config(&temp_dir);
    let (_relay, url) = start_relay(&config).await;

    let (ws, _) = tokio_tungstenite::connect_async(url.clone()).await.expect("ws connect");
    let (_write, mut read) = ws.split();

    let hub = BroadcastHub::new(config.channel.clone(), 64);
    let tab = Store::builder().bus(hub.endpoint()).build();
    let bridge = connect_peer(&url, hub, &RetryPolicy::default())
        .await
        .expect("peer");
    sleep(Duration::from_millis(100)).await;

    tab.set_leaf("cfg", "theme", Some(json!("dark")), false, false);
    let first = next_change(&mut read, Duration::from_secs(3)).await;
    assert_eq!(
        first.map(|e| e.message),
        Some(ChangeMessage::set("cfg", json!({"theme": "dark"})))
    );

    bridge.abort();
    sleep(Duration::from_millis(100)).await;
    assert!(bridge.is_finished());

    tab.set_leaf("cfg", "theme", Some(json!("light")), false, false);
    assert_eq!(next_change(&mut read, Duration::from_millis(500)).await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_bridge_stops_forwarding() {
    let temp_dir = TempDir::new().unwrap();
    let config = relay_config(&temp_dir);
    let (_relay, url) = start_relay(&config).await;

    let (ws, _) = tokio_tungstenite::connect_async(url.clone()).await.expect("ws connect");
    let (_write, mut read) = ws.split();

    let hub = BroadcastHub::new(config.channel.clone(), 64);
    let tab = Store::builder().bus(hub.endpoint()).build();
    let bridge = connect_peer(&url, hub, &RetryPolicy::default())
        .await
        .expect("peer");
    drop(bridge);
    sleep(Duration::from_millis(100)).await;

    tab.set_leaf("cfg", "theme", Some(json!("dark")), false, false);
    assert_eq!(next_change(&mut read, Duration::from_millis(500)).await, None);
}
