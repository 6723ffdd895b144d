use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use uuid::Uuid;

use super::protocol::BroadcastHub;
use super::{RecentIds, SyncFrame};
use crate::error::{with_retry, RetryPolicy};

/// A running relay bridge. Dropping it, or calling `abort`, stops both the
/// forwarder and the receiver.
pub struct PeerBridge {
    forward: JoinHandle<()>,
    recv: JoinHandle<()>,
}

impl PeerBridge {
    pub fn abort(&self) {
        self.forward.abort();
        self.recv.abort();
    }

    /// True once either direction has stopped
    pub fn is_finished(&self) -> bool {
        self.forward.is_finished() || self.recv.is_finished()
    }
}

impl Drop for PeerBridge {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Connect to a WebSocket relay and bridge envelopes between it and the
/// in-process hub. The bridge runs until the connection closes or the
/// returned `PeerBridge` is dropped.
pub async fn connect_peer(url: &str, hub: BroadcastHub, policy: &RetryPolicy) -> Result<PeerBridge> {
    let url = Url::parse(url).map_err(|e| anyhow!("invalid ws url: {e}"))?;
    let (ws_stream, _) =
        with_retry(policy, || tokio_tungstenite::connect_async(url.as_str())).await?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let peer_id = Uuid::new_v4();
    let hello = serde_json::to_string(&SyncFrame::hello(peer_id, hub.name()))?;
    ws_tx.send(Message::Text(hello.into())).await?;
    tracing::debug!(%url, %peer_id, channel = hub.name(), "connected to relay");

    // Every envelope crosses the bridge at most once, in either direction
    let seen = Arc::new(RecentIds::default());

    // Subscribe before spawning so nothing published meanwhile is lost
    let mut rx = hub.subscribe();

    // Spawn forwarder for local -> remote
    let seen_out = seen.clone();
    let forward = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if !seen_out.insert(envelope.id) {
                        continue;
                    }
                    let frame = SyncFrame::change((*envelope).clone());
                    if let Ok(json) = serde_json::to_string(&frame) {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "relay forwarder lagged; changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Spawn receiver for remote -> local
    let recv = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            let frame = match msg {
                Ok(Message::Text(text)) => serde_json::from_str::<SyncFrame>(text.as_str()).ok(),
                Ok(Message::Binary(bin)) => serde_cbor::from_slice::<SyncFrame>(&bin).ok(),
                Ok(Message::Close(_)) => break,
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!("relay connection error: {err}");
                    break;
                }
            };

            match frame {
                Some(SyncFrame::Hello { peer, channel }) => {
                    if channel != hub.name() {
                        tracing::warn!(%peer, %channel, "relay serves a different channel");
                    }
                }
                Some(SyncFrame::Change { envelope }) => {
                    // Drop our own echoes
                    if seen.insert(envelope.id) {
                        hub.send(Arc::new(envelope));
                    }
                }
                None => tracing::debug!("ignoring undecodable relay frame"),
            }
        }
    });

    Ok(PeerBridge { forward, recv })
}
