//! In-process pub/sub transport.
//!
//! Backed by a `tokio::sync::broadcast` channel. Two hubs sharing one
//! `MemoryPubSub` behave like two instances sharing a Redis server, which
//! is how the cross-instance tests run.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use parley_core::TransportError;
use parley_core::channel::pattern_matches;
use parley_core::collab::{PubSubTransport, TransportMessage, TransportStream};

/// Single-process transport. Publishing with no subscribers is not an error.
#[derive(Clone, Debug)]
pub struct MemoryPubSub {
    tx: broadcast::Sender<TransportMessage>,
}

impl MemoryPubSub {
    /// Create a transport whose subscribers may fall `buffer` messages behind
    /// before they start skipping.
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let _ = self.tx.send(TransportMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, patterns: &[&str]) -> Result<TransportStream, TransportError> {
        let patterns: Vec<String> = patterns.iter().map(|p| (*p).to_string()).collect();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| match item {
            Ok(msg) => patterns
                .iter()
                .any(|p| pattern_matches(p, &msg.channel))
                .then_some(msg),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "memory transport subscriber lagged");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn next(stream: &mut TransportStream) -> Option<TransportMessage> {
        tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let t = MemoryPubSub::new(4);
        assert_eq!(t.subscriber_count(), 0);
        t.publish("group:1", "x").await.unwrap();
    }

    #[tokio::test]
    async fn subscription_filters_by_pattern() {
        let t = MemoryPubSub::new(16);
        let mut groups = t.subscribe(&["group:*"]).await.unwrap();

        t.publish("private:bob", "p").await.unwrap();
        t.publish("group:9", "g").await.unwrap();

        let msg = next(&mut groups).await.unwrap();
        assert_eq!(msg.channel, "group:9");
        assert_eq!(msg.payload, "g");
        assert!(next(&mut groups).await.is_none());
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_match() {
        let t = MemoryPubSub::new(16);
        let mut a = t.subscribe(&["group:*", "private:*"]).await.unwrap();
        let mut b = t.subscribe(&["group:*", "private:*"]).await.unwrap();
        assert_eq!(t.subscriber_count(), 2);

        t.publish("private:bob", "hi").await.unwrap();
        assert_eq!(next(&mut a).await.unwrap().payload, "hi");
        assert_eq!(next(&mut b).await.unwrap().payload, "hi");
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_and_continues() {
        let t = MemoryPubSub::new(2);
        let mut s = t.subscribe(&["group:*"]).await.unwrap();
        for i in 0..5 {
            t.publish("group:1", &i.to_string()).await.unwrap();
        }
        // The oldest messages were overwritten; the newest two survive.
        assert_eq!(next(&mut s).await.unwrap().payload, "3");
        assert_eq!(next(&mut s).await.unwrap().payload, "4");
    }
}
