pub mod protocol;
pub mod remote;

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use protocol::{BroadcastHub, ChannelEndpoint};

// Cross-context sync: every persisted write or delete of a root namespace is
// published as a ChangeMessage. Other contexts apply it to their in-memory
// map and re-run notification; persistence is never the sync channel.

/// Whole-root change for one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeMessage {
    Set {
        #[serde(default)]
        key: String,
        value: Value,
    },
    Delete {
        #[serde(default)]
        key: String,
    },
}

impl ChangeMessage {
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        ChangeMessage::Set {
            key: key.into(),
            value,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        ChangeMessage::Delete { key: key.into() }
    }

    /// Root namespace the change applies to
    pub fn key(&self) -> &str {
        match self {
            ChangeMessage::Set { key, .. } | ChangeMessage::Delete { key } => key,
        }
    }
}

/// Transport frame around a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    /// Endpoint that published the change; it never receives it back
    pub sender: Uuid,
    pub sent_at: DateTime<Utc>,
    pub message: ChangeMessage,
}

impl Envelope {
    pub fn new(sender: Uuid, message: ChangeMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            sent_at: Utc::now(),
            message,
        }
    }
}

/// Relay wire frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum SyncFrame {
    Hello { peer: Uuid, channel: String },
    Change { envelope: Envelope },
}

impl SyncFrame {
    pub fn hello(peer: Uuid, channel: impl Into<String>) -> Self {
        SyncFrame::Hello {
            peer,
            channel: channel.into(),
        }
    }

    pub fn change(envelope: Envelope) -> Self {
        SyncFrame::Change { envelope }
    }
}

/// Envelope ids remembered for echo suppression by a relay or bridge
pub const SEEN_WINDOW: usize = 4096;

/// The most recent envelope ids, oldest evicted first
///
/// Echoes arrive within a few hops of the original, so a bounded window is
/// enough to stop loops without growing for the life of the connection.
pub struct RecentIds {
    capacity: usize,
    inner: Mutex<(HashSet<Uuid>, VecDeque<Uuid>)>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new((HashSet::with_capacity(capacity), VecDeque::with_capacity(capacity))),
        }
    }

    /// Record `id`; false when it is already in the window
    pub fn insert(&self, id: Uuid) -> bool {
        let mut guard = self.inner.lock();
        let (set, order) = &mut *guard;
        if !set.insert(id) {
            return false;
        }
        order.push_back(id);
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(SEEN_WINDOW)
    }
}

pub type MessageHandler = Box<dyn Fn(ChangeMessage) + Send + Sync>;

/// Cross-context message bus
///
/// `publish` is fire-and-forget. Handlers registered with `on_message` see
/// changes published by every other context on the same bus, never the
/// registering context's own.
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: ChangeMessage);

    fn on_message(&self, handler: MessageHandler);
}

/// Bus for single-process targets: publishes go nowhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBus;

impl MessageBus for NoopBus {
    fn publish(&self, _message: ChangeMessage) {}

    fn on_message(&self, _handler: MessageHandler) {}
}
