//! Subscription handles over the store
//!
//! - `watch` follows one key and refreshes whenever its notification fires.
//! - `watch_debounced` republishes a watched value once it has settled.
//! - `on_change` runs a replaceable callback with each new value.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::path::join;
use crate::store::{Store, Subscription};

/// Live view of the value at one key
pub struct ObjectWatch {
    key: String,
    rx: watch::Receiver<Option<Value>>,
    hydration: Option<Value>,
    _subscription: Subscription,
}

impl ObjectWatch {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest value seen by the watch
    pub fn get(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    /// Snapshot taken when the watch was created, for server-side rendering
    pub fn hydration_snapshot(&self) -> Option<&Value> {
        self.hydration.as_ref()
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next notification and return the value it produced
    pub async fn changed(&mut self) -> Result<Option<Value>> {
        self.rx
            .changed()
            .await
            .map_err(|_| anyhow!("store dropped while watching {}", self.key))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    pub fn receiver(&self) -> watch::Receiver<Option<Value>> {
        self.rx.clone()
    }
}

/// Watch whose output only moves after the input has been quiet for `delay`
pub struct DebouncedWatch {
    rx: watch::Receiver<Option<Value>>,
    task: JoinHandle<()>,
}

impl DebouncedWatch {
    pub fn get(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> Result<Option<Value>> {
        self.rx
            .changed()
            .await
            .map_err(|_| anyhow!("debounce task stopped"))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    pub fn receiver(&self) -> watch::Receiver<Option<Value>> {
        self.rx.clone()
    }
}

impl Drop for DebouncedWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type ChangeCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Effect-only subscription; always calls the most recent callback
pub struct ChangeHandle {
    callback: Arc<RwLock<ChangeCallback>>,
    _subscription: Subscription,
}

impl ChangeHandle {
    /// Replace the callback without re-subscribing
    pub fn update<F>(&self, on_change: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        *self.callback.write() = Arc::new(on_change);
    }
}

impl Store {
    /// Follow `namespace.path`
    pub fn watch(self: &Arc<Self>, namespace: &str, path: &str) -> ObjectWatch {
        let key = join(namespace, path);
        let hydration = self.get_snapshot(&key);
        let (tx, rx) = watch::channel(hydration.clone());

        let weak = Arc::downgrade(self);
        let listener_key = key.clone();
        let subscription = self.subscribe(&key, move || {
            if let Some(store) = weak.upgrade() {
                tx.send_replace(store.get_snapshot(&listener_key));
            }
        });

        ObjectWatch {
            key,
            rx,
            hydration,
            _subscription: subscription,
        }
    }

    /// Follow `namespace.path`, collapsing bursts of changes into one update
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch_debounced(
        self: &Arc<Self>,
        namespace: &str,
        path: &str,
        delay: Duration,
    ) -> DebouncedWatch {
        let source = self.watch(namespace, path);
        let (tx, rx) = watch::channel(source.get());
        let task = tokio::spawn(debounce(source, tx, delay));

        DebouncedWatch { rx, task }
    }

    /// Call `on_change` with the new value each time `key` is notified
    pub fn on_change<F>(self: &Arc<Self>, key: &str, on_change: F) -> ChangeHandle
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        let callback: Arc<RwLock<ChangeCallback>> = Arc::new(RwLock::new(Arc::new(on_change)));

        let weak = Arc::downgrade(self);
        let slot = callback.clone();
        let listener_key = key.to_string();
        let subscription = self.subscribe(key, move || {
            let Some(store) = weak.upgrade() else {
                return;
            };
            let latest = slot.read().clone();
            latest(store.get_snapshot(&listener_key));
        });

        ChangeHandle {
            callback,
            _subscription: subscription,
        }
    }
}

async fn debounce(mut source: ObjectWatch, tx: watch::Sender<Option<Value>>, delay: Duration) {
    loop {
        // First change of a burst
        if source.rx.changed().await.is_err() {
            return;
        }

        // Every further change restarts the quiet period
        loop {
            tokio::select! {
                changed = source.rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => break,
            }
        }

        let latest = source.rx.borrow_and_update().clone();
        tx.send_if_modified(|current| {
            if *current == latest {
                return false;
            }
            *current = latest;
            true
        });
    }
}
