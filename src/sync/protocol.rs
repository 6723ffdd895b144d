use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::{ChangeMessage, Envelope, MessageBus, MessageHandler};

/// In-process broadcast channel shared by every endpoint ("tab") cloned from it
#[derive(Clone)]
pub struct BroadcastHub {
    name: String,
    tx: broadcast::Sender<Arc<Envelope>>,
}

impl BroadcastHub {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A new endpoint on this channel with its own sender id
    pub fn endpoint(&self) -> Arc<ChannelEndpoint> {
        Arc::new(ChannelEndpoint {
            id: Uuid::new_v4(),
            hub: self.clone(),
            receivers: Mutex::new(Vec::new()),
        })
    }

    /// Raw envelope stream, own echoes included
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.tx.subscribe()
    }

    /// Inject an envelope as-is, keeping its original sender
    pub fn send(&self, envelope: Arc<Envelope>) {
        // No receivers is not an error for a broadcast channel
        let _ = self.tx.send(envelope);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One context's handle on a `BroadcastHub`
///
/// Receive loops started by `on_message` live as long as the endpoint; the
/// owning store drops it, and with it every loop.
pub struct ChannelEndpoint {
    id: Uuid,
    hub: BroadcastHub,
    receivers: Mutex<Vec<AbortHandle>>,
}

impl ChannelEndpoint {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        for receiver in self.receivers.get_mut().drain(..) {
            receiver.abort();
        }
    }
}

impl MessageBus for ChannelEndpoint {
    fn publish(&self, message: ChangeMessage) {
        tracing::debug!(channel = %self.hub.name, key = message.key(), "publish");
        self.hub.send(Arc::new(Envelope::new(self.id, message)));
    }

    fn on_message(&self, handler: MessageHandler) {
        // Subscribe now so nothing published after registration is missed
        let mut rx = self.hub.subscribe();
        let own_id = self.id;
        let channel = self.hub.name.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%channel, "no async runtime; cross-context messages will not be delivered");
            return;
        };

        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.sender == own_id {
                            continue;
                        }
                        handler(envelope.message.clone());
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%channel, skipped, "receiver lagged; changes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.receivers.lock().push(task.abort_handle());
    }
}
