//! Cross-instance bridge: subscribes to every group and private channel on
//! the shared transport and re-injects what arrives into the local hub.
//!
//! Group events are published, never delivered locally by the sender's
//! instance, so the bridge is the single local delivery path for them.

pub mod memory;
pub mod redis_pubsub;

use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use parley_core::channel::SUBSCRIPTION_PATTERNS;
use parley_core::collab::{PubSubTransport, TransportMessage};
use parley_core::{Channel, Payload, TransportError};

use crate::errors::ServerError;
use crate::hub::HubHandle;
use crate::metrics::BRIDGE_MESSAGES_TOTAL;

pub use self::memory::MemoryPubSub;
pub use self::redis_pubsub::RedisPubSub;

/// Forwards transport messages into a [`HubHandle`].
pub struct Bridge {
    transport: Arc<dyn PubSubTransport>,
    hub: HubHandle,
}

impl Bridge {
    /// Create a bridge between `transport` and `hub`.
    pub fn new(transport: Arc<dyn PubSubTransport>, hub: HubHandle) -> Self {
        Self { transport, hub }
    }

    /// Subscribe, then spawn the forwarding task.
    ///
    /// The subscription is established before this returns, so anything
    /// published afterwards is seen. The task ends when `cancel` fires,
    /// the transport stream ends, or the hub stops.
    #[instrument(skip_all, name = "bridge")]
    pub async fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>, TransportError> {
        let mut stream = self.transport.subscribe(&SUBSCRIPTION_PATTERNS).await?;
        info!(patterns = ?SUBSCRIPTION_PATTERNS, "bridge subscribed");

        let hub = self.hub;
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("bridge cancelled");
                        break;
                    }
                    next = stream.next() => {
                        let Some(msg) = next else {
                            warn!("bridge subscription ended");
                            break;
                        };
                        if let Err(ServerError::HubClosed) = route(&hub, msg).await {
                            debug!("hub stopped; bridge exiting");
                            break;
                        }
                    }
                }
            }
        }
        .in_current_span()))
    }
}

/// Deliver one transport message according to its channel.
#[instrument(skip_all, fields(channel = %msg.channel))]
async fn route(hub: &HubHandle, msg: TransportMessage) -> Result<(), ServerError> {
    counter!(BRIDGE_MESSAGES_TOTAL).increment(1);
    let payload: Payload = Arc::from(msg.payload);
    match Channel::parse(&msg.channel) {
        Some(Channel::Group(_)) => hub.deliver_to_group(&msg.channel, payload).await,
        Some(Channel::Private(user)) => hub.deliver_to_user(user, payload).await,
        None => {
            warn!(channel = %msg.channel, "dropping message on unrecognized channel");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use parley_core::collab::MembershipResolver;
    use parley_core::{ConnectionId, GroupId, StoreFailure, UserId};
    use parley_settings::MembershipFallback;

    use super::*;
    use crate::hub::Hub;

    struct Members(Vec<&'static str>);

    #[async_trait]
    impl MembershipResolver for Members {
        async fn members(&self, _group: GroupId) -> Result<HashSet<UserId>, StoreFailure> {
            Ok(self.0.iter().map(|s| UserId::from(*s)).collect())
        }

        async fn is_member(&self, _group: GroupId, user: &UserId) -> Result<bool, StoreFailure> {
            Ok(self.0.iter().any(|m| *m == user.as_str()))
        }
    }

    async fn setup(
        members: Vec<&'static str>,
    ) -> (Arc<MemoryPubSub>, HubHandle, CancellationToken, JoinHandle<()>) {
        let transport = Arc::new(MemoryPubSub::new(64));
        let (hub, _task) = Hub::spawn(
            64,
            Arc::new(Members(members)),
            transport.clone(),
            MembershipFallback::Drop,
        );
        let cancel = CancellationToken::new();
        let bridge = Bridge::new(transport.clone(), hub.clone())
            .start(cancel.clone())
            .await
            .unwrap();
        (transport, hub, cancel, bridge)
    }

    async fn connect(hub: &HubHandle, user: &str) -> mpsc::Receiver<Payload> {
        let (tx, rx) = mpsc::channel(8);
        hub.register(UserId::from(user), ConnectionId::generate(), tx)
            .await
            .unwrap();
        rx
    }

    async fn recv(rx: &mut mpsc::Receiver<Payload>) -> Option<Payload> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn group_channel_reaches_members_only() {
        let (transport, hub, _cancel, _bridge) = setup(vec!["alice", "bob"]).await;
        let mut bob = connect(&hub, "bob").await;
        let mut carol = connect(&hub, "carol").await;

        transport.publish("group:7", "evt").await.unwrap();

        assert_eq!(recv(&mut bob).await.as_deref(), Some("evt"));
        assert!(recv(&mut carol).await.is_none());
    }

    #[tokio::test]
    async fn private_channel_reaches_every_device() {
        let (transport, hub, _cancel, _bridge) = setup(vec![]).await;
        let mut phone = connect(&hub, "bob").await;
        let mut laptop = connect(&hub, "bob").await;

        transport.publish("private:bob", "dm").await.unwrap();

        assert_eq!(recv(&mut phone).await.as_deref(), Some("dm"));
        assert_eq!(recv(&mut laptop).await.as_deref(), Some("dm"));
    }

    #[tokio::test]
    async fn unknown_channels_are_ignored() {
        let (transport, hub, _cancel, _bridge) = setup(vec!["alice"]).await;
        let mut alice = connect(&hub, "alice").await;

        transport.publish("presence:alice", "x").await.unwrap();
        transport.publish("group:zero", "x").await.unwrap();
        transport.publish("private:alice", "ok").await.unwrap();

        assert_eq!(recv(&mut alice).await.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn cancel_stops_the_task() {
        let (_transport, _hub, cancel, bridge) = setup(vec![]).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn hub_shutdown_stops_the_task() {
        let (transport, hub, _cancel, bridge) = setup(vec![]).await;
        hub.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.publish("private:alice", "late").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .unwrap()
            .unwrap();
    }
}
