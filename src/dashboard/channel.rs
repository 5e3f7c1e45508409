//! Topic-based publish/subscribe transport.
//!
//! Publishing is one-way: no acknowledgement, no backpressure, no retry.
//! A message published while nobody is subscribed is dropped, which gives
//! the at-most-once delivery the report pipeline is built around.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::ChannelError;

pub const REPORT_GENERATE_TOPIC: &str = "e2e:report:generate";
pub const PULL_REQUEST_DELETE_TOPIC: &str = "pull-request:delete";
pub const NOTIFICATION_CREATE_TOPIC: &str = "notification:create";

/// One-way publish capability. Implementations decide the transport.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError>;
}

/// Serialize `message` as JSON and publish it on `topic`.
pub async fn publish_json<T>(
    channel: &dyn Channel,
    topic: &str,
    message: &T,
) -> Result<(), ChannelError>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string(message).map_err(|source| ChannelError::Serialize {
        topic: topic.to_string(),
        source,
    })?;
    channel.publish(topic, payload).await
}

/// In-process channel backed by one `tokio::sync::broadcast` sender per topic.
pub struct BroadcastChannel {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> Result<broadcast::Sender<String>, ChannelError> {
        let mut topics = self.topics.lock().map_err(|_| ChannelError::Transport {
            topic: topic.to_string(),
            message: "topic registry lock poisoned".to_string(),
        })?;
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(tx.clone())
    }

    /// Subscribe to `topic`. Only messages published after this call are seen.
    pub fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, ChannelError> {
        Ok(self.sender(topic)?.subscribe())
    }
}

#[async_trait]
impl Channel for BroadcastChannel {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        let tx = self.sender(topic)?;
        match tx.send(payload) {
            Ok(receivers) => {
                tracing::debug!(topic, receivers, "published");
            }
            Err(_) => {
                tracing::debug!(topic, "published with no subscribers; message dropped");
            }
        }
        Ok(())
    }
}

/// A message captured by [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// Channel that records every publish instead of delivering it.
///
/// Used by `coordinate --dry-run` and throughout the test-suite. Topics can
/// be switched into a failing mode to exercise publish-error paths.
#[derive(Default)]
pub struct MemoryChannel {
    published: Mutex<Vec<PublishedMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish to `topic` fail.
    pub fn fail_topic(&self, topic: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(topic.to_string());
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Payloads published on `topic`, in publish order.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(topic))
            .unwrap_or(false);
        if failing {
            return Err(ChannelError::Transport {
                topic: topic.to_string(),
                message: "simulated transport failure".to_string(),
            });
        }
        let mut published = self.published.lock().map_err(|_| ChannelError::Transport {
            topic: topic.to_string(),
            message: "recorder lock poisoned".to_string(),
        })?;
        published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let channel = BroadcastChannel::new(8);
        let mut rx = channel.subscribe(REPORT_GENERATE_TOPIC).unwrap();

        channel
            .publish(REPORT_GENERATE_TOPIC, "hello".to_string())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_broadcast_topics_are_isolated() {
        let channel = BroadcastChannel::new(8);
        let mut rx = channel.subscribe(NOTIFICATION_CREATE_TOPIC).unwrap();

        channel
            .publish(PULL_REQUEST_DELETE_TOPIC, "a".to_string())
            .await
            .unwrap();
        channel
            .publish(NOTIFICATION_CREATE_TOPIC, "b".to_string())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_publish_without_subscribers_is_ok() {
        let channel = BroadcastChannel::new(8);
        let result = channel.publish("nobody:listens", "x".to_string()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_json_serializes_payload() {
        let channel = MemoryChannel::new();
        publish_json(&channel, "t", &serde_json::json!({"date": "2025-10-09"}))
            .await
            .unwrap();
        assert_eq!(channel.payloads("t"), vec![r#"{"date":"2025-10-09"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_memory_channel_failing_topic() {
        let channel = MemoryChannel::new();
        channel.fail_topic("t");

        let err = channel.publish("t", "x".to_string()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport { .. }));
        assert!(channel.published().is_empty());

        channel.publish("other", "y".to_string()).await.unwrap();
        assert_eq!(channel.published().len(), 1);
    }
}
