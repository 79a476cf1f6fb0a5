//! Push-notification seam.
//!
//! The pub/sub transport is an external collaborator; the daemon only
//! needs its publish/subscribe primitives. [`BroadcastPublisher`] is the
//! in-process implementation used by the daemon and the test suite.

use serde_json::Value;
use tokio::sync::broadcast;

/// Publish side of the collaborator. Fire-and-forget: delivery is
/// best-effort by contract, the command queue never depends on it.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Broadcasts topic-tagged JSON payloads to all in-process subscribers.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<String>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Subscribe to all published notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, topic: &str, payload: Value) {
        let notification = serde_json::json!({
            "topic": topic,
            "payload": payload
        });
        // Ignore errors — no subscribers is fine
        let _ = self
            .tx
            .send(serde_json::to_string(&notification).unwrap_or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_topic_and_payload() {
        let publisher = BroadcastPublisher::new();
        let mut rx = publisher.subscribe();
        publisher.publish("command.created", serde_json::json!({ "command_id": "c1" }));
        let raw = rx.recv().await.unwrap();
        let msg: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg["topic"], "command.created");
        assert_eq!(msg["payload"]["command_id"], "c1");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        BroadcastPublisher::new().publish("presence.updated", Value::Null);
    }
}
