use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::categorize_error;
use crate::storage::{self, Persistence};
use crate::store::Store;
use crate::sync::{BroadcastHub, ChangeMessage, Envelope, RecentIds, SyncFrame};

#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    /// Mirror of every namespace the relay has seen
    pub store: Arc<Store>,
    pub persistence: Option<Arc<dyn Persistence>>,
    /// Recently relayed envelope ids; a repeat is dropped
    pub seen: Arc<RecentIds>,
    pub relay_id: Uuid,
}

impl AppState {
    /// Must be called from within a Tokio runtime
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let hub = BroadcastHub::new(config.channel.clone(), config.bus_capacity);
        let persistence = storage::open(config)?;

        let mut builder = Store::builder().bus(hub.endpoint());
        if let Some(persistence) = &persistence {
            builder = builder.persistence(persistence.clone());
        }

        Ok(Self {
            hub,
            store: builder.build(),
            persistence,
            seen: Arc::new(RecentIds::default()),
            relay_id: Uuid::new_v4(),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "juststore relay" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/ws", get(ws_handler))
        .route("/namespaces", get(get_namespaces))
        .route("/store/{key}", get(get_value))
        .with_state(state)
}

pub async fn serve(port: u16, config: StoreConfig) -> Result<()> {
    let state = AppState::new(&config)?;
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    println!(
        "{} Relay for channel {} running at {}",
        "✓".green(),
        config.channel.bright_yellow(),
        format!("http://{}", addr).bright_blue()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

async fn handle_ws(state: AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let hello = SyncFrame::hello(state.relay_id, state.hub.name());
    if let Ok(text) = serde_json::to_string(&hello) {
        let _ = sender.send(Message::Text(text.into())).await;
    }

    // Everything on the hub goes to every client, its own envelopes included
    let mut rx = state.hub.subscribe();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let frame = SyncFrame::change((*envelope).clone());
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "relay client lagged; changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let state_recv = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let frame = match msg {
                Ok(Message::Text(text)) => serde_json::from_str::<SyncFrame>(text.as_str()).ok(),
                Ok(Message::Binary(bin)) => serde_cbor::from_slice::<SyncFrame>(&bin).ok(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(_) => break,
            };

            match frame {
                Some(SyncFrame::Hello { peer, channel }) => {
                    if channel != state_recv.hub.name() {
                        tracing::warn!(%peer, %channel, "dropping peer on a different channel");
                        break;
                    }
                    tracing::info!(%peer, %channel, "peer joined");
                }
                Some(SyncFrame::Change { envelope }) => accept(&state_recv, envelope),
                None => tracing::debug!("ignoring undecodable frame"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Persist and fan out a client envelope the relay has not seen yet
fn accept(state: &AppState, envelope: Envelope) {
    if envelope.message.key().is_empty() || !state.seen.insert(envelope.id) {
        return;
    }

    persist(state, &envelope.message);
    state.hub.send(Arc::new(envelope));
}

fn persist(state: &AppState, message: &ChangeMessage) {
    let Some(persistence) = &state.persistence else {
        return;
    };

    let result = match message {
        ChangeMessage::Set { key, value } => serde_json::to_string(value)
            .map_err(anyhow::Error::from)
            .and_then(|json| persistence.set(key, &json)),
        ChangeMessage::Delete { key } => persistence.delete(key),
    };

    if let Err(err) = result {
        tracing::warn!(
            namespace = message.key(),
            category = %categorize_error(&err),
            "relay could not persist change: {err:#}"
        );
    }
}

async fn get_namespaces(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    let mut names = state.store.namespaces();
    if let Some(persistence) = &state.persistence {
        let persisted = persistence
            .namespaces()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        names.extend(persisted);
    }
    names.sort();
    names.dedup();

    Ok(Json(names))
}

async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state
        .store
        .get_snapshot(&key)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
