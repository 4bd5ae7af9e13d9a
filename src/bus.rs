//! In-process change dispatch.
//!
//! Store mutations publish [`ChangeEvent`]s; each SSE subscriber holds a
//! broadcast receiver. Delivery is best-effort: a subscriber that stops
//! draining falls off the channel and its stream ends.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "UPDATE")]
    Update,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "NEW",
            EventKind::Update => "UPDATE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Bus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast to whoever is listening; no subscribers is not an error.
    pub fn publish(&self, kind: EventKind, data: serde_json::Value) {
        let _ = self.tx.send(ChangeEvent { kind, data });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}
