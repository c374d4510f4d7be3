// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Room-scoped pub/sub transport.

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Per-topic buffer of the in-process bus. Slow subscribers lag, they never
/// block publishers.
const TOPIC_CAPACITY: usize = 256;

/// Ordered-per-topic pub/sub channel carrying JSON payloads.
///
/// A network transport (websocket, Redis, ...) lives outside the engine and
/// implements this trait.
pub trait ControlBus: Send + Sync {
    fn publish(&self, topic: &str, payload: String);

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String>;
}

/// In-process bus backed by one broadcast channel per topic.
#[derive(Default)]
pub struct RoomBus {
    topics: DashMap<String, broadcast::Sender<String>>,
}

impl RoomBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl ControlBus for RoomBus {
    fn publish(&self, topic: &str, payload: String) {
        let Some(sender) = self.topics.get(topic).map(|s| s.clone()) else {
            // No subscribers, event is dropped (fire-and-forget)
            return;
        };
        if sender.send(payload).is_err() {
            // Every receiver is gone
            self.topics.remove_if(topic, |_, s| s.receiver_count() == 0);
        }
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_routing() {
        let bus = RoomBus::new();
        let mut control = bus.subscribe("room:a:control");
        let mut status = bus.subscribe("room:a:status");

        bus.publish("room:a:status", "streaming".into());

        assert_eq!(status.recv().await.unwrap(), "streaming");
        assert!(control.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_messages() {
        let bus = RoomBus::new();
        bus.publish("room:a:status", "first".into());

        let mut rx = bus.subscribe("room:a:status");
        bus.publish("room:a:status", "second".into());

        assert_eq!(rx.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_receive() {
        let bus = RoomBus::new();
        let mut receivers: Vec<_> = (0..3).map(|_| bus.subscribe("room:a:status")).collect();

        bus.publish("room:a:status", "ready".into());

        for rx in receivers.iter_mut() {
            assert_eq!(rx.recv().await.unwrap(), "ready");
        }
    }

    #[test]
    fn test_dropped_subscribers_release_topic() {
        let bus = RoomBus::new();
        let rx = bus.subscribe("room:a:control");
        drop(rx);

        bus.publish("room:a:control", "{}".into());
        assert!(bus.topics.get("room:a:control").is_none());
    }
}
