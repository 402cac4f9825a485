use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use parley_core::collab::{MembershipResolver, PubSubTransport};
use parley_core::{Channel, ConnectionId, Payload, TransportError, UserId};
use parley_settings::MembershipFallback;

use super::actor::Command;
use super::registry::HubStats;
use crate::errors::ServerError;
use crate::metrics::GROUP_FANOUT_FAILURES_TOTAL;

/// Cheap, cloneable command capability for the hub.
///
/// Holding a handle does not keep any connection alive; sessions use it
/// only to register themselves, ask for their own removal, and route
/// payloads. Every method returns [`ServerError::HubClosed`] once the hub
/// task has stopped.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
    membership: Arc<dyn MembershipResolver>,
    transport: Arc<dyn PubSubTransport>,
    fallback: MembershipFallback,
}

impl fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubHandle")
            .field("fallback", &self.fallback)
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl HubHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<Command>,
        membership: Arc<dyn MembershipResolver>,
        transport: Arc<dyn PubSubTransport>,
        fallback: MembershipFallback,
    ) -> Self {
        Self {
            tx,
            membership,
            transport,
            fallback,
        }
    }

    async fn send(&self, cmd: Command) -> Result<(), ServerError> {
        self.tx.send(cmd).await.map_err(|_| ServerError::HubClosed)
    }

    /// File a connection under `user`. The registry takes ownership of `tx`,
    /// which must be the only sender for that queue.
    pub async fn register(
        &self,
        user: UserId,
        conn: ConnectionId,
        tx: mpsc::Sender<Payload>,
    ) -> Result<(), ServerError> {
        self.send(Command::Register { user, conn, tx }).await
    }

    /// Remove a connection and close its queue. A no-op if it was already
    /// evicted.
    pub async fn unregister(&self, conn: ConnectionId) -> Result<(), ServerError> {
        self.send(Command::Unregister { conn }).await
    }

    /// Enqueue on every connection of `user`.
    pub async fn deliver_to_user(&self, user: UserId, payload: Payload) -> Result<(), ServerError> {
        self.send(Command::DeliverToUser { user, payload }).await
    }

    /// Enqueue on one connection. Used for acks, errors, and the sender echo,
    /// so they share the connection's FIFO with every other payload.
    pub async fn deliver_to_connection(
        &self,
        conn: ConnectionId,
        payload: Payload,
    ) -> Result<(), ServerError> {
        self.send(Command::DeliverToConnection { conn, payload }).await
    }

    /// Enqueue on every registered connection.
    pub async fn deliver_to_all(&self, payload: Payload) -> Result<(), ServerError> {
        self.send(Command::DeliverToAll { payload }).await
    }

    /// Fan `payload` out to the locally connected members of the group
    /// named by `channel` (`group:<id>`).
    ///
    /// Membership is resolved here, in the caller's task, so the hub never
    /// waits on the resolver. When the channel does not name a group or the
    /// resolver fails, the configured [`MembershipFallback`] applies.
    pub async fn deliver_to_group(&self, channel: &str, payload: Payload) -> Result<(), ServerError> {
        let Some(Channel::Group(group)) = Channel::parse(channel) else {
            return self.membership_unavailable(channel, "not a group channel", payload).await;
        };
        match self.membership.members(group).await {
            Ok(members) => self.send(Command::DeliverToMembers { members, payload }).await,
            Err(e) => {
                self.membership_unavailable(channel, &e.to_string(), payload)
                    .await
            }
        }
    }

    async fn membership_unavailable(
        &self,
        channel: &str,
        reason: &str,
        payload: Payload,
    ) -> Result<(), ServerError> {
        match self.fallback {
            MembershipFallback::Drop => {
                error!(channel, reason, "group membership unavailable; dropping event");
                counter!(GROUP_FANOUT_FAILURES_TOTAL).increment(1);
                Ok(())
            }
            MembershipFallback::BroadcastAll => {
                warn!(channel, reason, "group membership unavailable; broadcasting to all");
                self.deliver_to_all(payload).await
            }
        }
    }

    /// Publish on the shared transport so every instance, this one included,
    /// receives the payload through its bridge.
    pub async fn publish_cross_instance(
        &self,
        channel: &str,
        payload: &str,
    ) -> Result<(), TransportError> {
        self.transport.publish(channel, payload).await
    }

    /// Current registry size.
    pub async fn stats(&self) -> Result<HubStats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| ServerError::HubClosed)
    }

    /// Close every queue and stop the hub task.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.send(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_core::collab::TransportStream;
    use parley_core::{GroupId, StoreFailure};

    use super::*;
    use crate::bridge::MemoryPubSub;
    use crate::hub::Hub;

    struct StaticMembers(Result<HashSet<UserId>, StoreFailure>);

    #[async_trait]
    impl MembershipResolver for StaticMembers {
        async fn members(&self, _group: GroupId) -> Result<HashSet<UserId>, StoreFailure> {
            self.0.clone()
        }

        async fn is_member(&self, _group: GroupId, user: &UserId) -> Result<bool, StoreFailure> {
            self.0.clone().map(|m| m.contains(user))
        }
    }

    #[derive(Default)]
    struct RecordingTransport(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl PubSubTransport for RecordingTransport {
        async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
            self.0
                .lock()
                .unwrap()
                .push((channel.to_string(), payload.to_string()));
            Ok(())
        }

        async fn subscribe(&self, _patterns: &[&str]) -> Result<TransportStream, TransportError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn members(ids: &[&str]) -> Result<HashSet<UserId>, StoreFailure> {
        Ok(ids.iter().map(|s| UserId::from(*s)).collect())
    }

    fn spawn_hub(
        resolver: Result<HashSet<UserId>, StoreFailure>,
        fallback: MembershipFallback,
    ) -> HubHandle {
        let (hub, _task) = Hub::spawn(
            64,
            Arc::new(StaticMembers(resolver)),
            Arc::new(MemoryPubSub::new(16)),
            fallback,
        );
        hub
    }

    async fn connect(hub: &HubHandle, user: &str, conn: &str) -> mpsc::Receiver<Payload> {
        let (tx, rx) = mpsc::channel(8);
        hub.register(UserId::from(user), ConnectionId::from(conn), tx)
            .await
            .unwrap();
        rx
    }

    async fn settle(hub: &HubHandle) {
        // Stats is processed after every earlier command.
        let _ = hub.stats().await.unwrap();
    }

    #[tokio::test]
    async fn register_then_stats() {
        let hub = spawn_hub(members(&[]), MembershipFallback::Drop);
        let _a1 = connect(&hub, "a", "a1").await;
        let _a2 = connect(&hub, "a", "a2").await;
        let _b1 = connect(&hub, "b", "b1").await;
        assert_eq!(
            hub.stats().await.unwrap(),
            HubStats {
                users: 2,
                connections: 3
            }
        );

        hub.unregister(ConnectionId::from("a1")).await.unwrap();
        hub.unregister(ConnectionId::from("a1")).await.unwrap();
        assert_eq!(hub.stats().await.unwrap().connections, 2);
    }

    #[tokio::test]
    async fn group_delivery_reaches_only_local_members() {
        let hub = spawn_hub(members(&["a", "b"]), MembershipFallback::Drop);
        let mut a = connect(&hub, "a", "a1").await;
        let mut c = connect(&hub, "c", "c1").await;

        hub.deliver_to_group("group:7", Arc::from("evt")).await.unwrap();
        settle(&hub).await;

        assert_eq!(&*a.try_recv().unwrap(), "evt");
        assert!(c.try_recv().is_err());
    }

    #[tokio::test]
    async fn resolver_failure_drops_by_default() {
        let hub = spawn_hub(
            Err(StoreFailure::Unavailable("db down".into())),
            MembershipFallback::Drop,
        );
        let mut a = connect(&hub, "a", "a1").await;

        hub.deliver_to_group("group:7", Arc::from("evt")).await.unwrap();
        settle(&hub).await;
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn resolver_failure_can_broadcast_to_all() {
        let hub = spawn_hub(
            Err(StoreFailure::Unavailable("db down".into())),
            MembershipFallback::BroadcastAll,
        );
        let mut a = connect(&hub, "a", "a1").await;
        let mut b = connect(&hub, "b", "b1").await;

        hub.deliver_to_group("group:7", Arc::from("evt")).await.unwrap();
        settle(&hub).await;
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn malformed_group_channel_follows_fallback() {
        let hub = spawn_hub(members(&["a"]), MembershipFallback::Drop);
        let mut a = connect(&hub, "a", "a1").await;

        hub.deliver_to_group("group:abc", Arc::from("evt")).await.unwrap();
        hub.deliver_to_group("group:0", Arc::from("evt")).await.unwrap();
        settle(&hub).await;
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn acks_and_events_share_connection_fifo() {
        let hub = spawn_hub(members(&[]), MembershipFallback::Drop);
        let mut a = connect(&hub, "a", "a1").await;

        hub.deliver_to_connection(ConnectionId::from("a1"), Arc::from("ack"))
            .await
            .unwrap();
        hub.deliver_to_user(UserId::from("a"), Arc::from("event"))
            .await
            .unwrap();
        hub.deliver_to_connection(ConnectionId::from("a1"), Arc::from("echo"))
            .await
            .unwrap();
        settle(&hub).await;

        assert_eq!(&*a.recv().await.unwrap(), "ack");
        assert_eq!(&*a.recv().await.unwrap(), "event");
        assert_eq!(&*a.recv().await.unwrap(), "echo");
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_and_others_still_served() {
        let hub = spawn_hub(members(&[]), MembershipFallback::Drop);
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        hub.register(UserId::from("a"), ConnectionId::from("slow"), slow_tx)
            .await
            .unwrap();
        let mut fast = connect(&hub, "a", "fast").await;

        hub.deliver_to_user(UserId::from("a"), Arc::from("1")).await.unwrap();
        hub.deliver_to_user(UserId::from("a"), Arc::from("2")).await.unwrap();
        settle(&hub).await;

        assert_eq!(hub.stats().await.unwrap().connections, 1);
        assert_eq!(&*slow_rx.recv().await.unwrap(), "1");
        assert!(slow_rx.recv().await.is_none());
        assert_eq!(&*fast.recv().await.unwrap(), "1");
        assert_eq!(&*fast.recv().await.unwrap(), "2");
    }

    #[tokio::test]
    async fn shutdown_closes_queues_and_rejects_commands() {
        let hub = spawn_hub(members(&[]), MembershipFallback::Drop);
        let mut a = connect(&hub, "a", "a1").await;

        hub.shutdown().await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(1), a.recv())
            .await
            .unwrap();
        assert!(closed.is_none());

        // The mailbox receiver is dropped once the task returns.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(hub.stats().await, Err(ServerError::HubClosed)));
    }

    #[tokio::test]
    async fn publish_goes_to_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let (hub, _task) = Hub::spawn(
            8,
            Arc::new(StaticMembers(members(&[]))),
            transport.clone(),
            MembershipFallback::Drop,
        );
        hub.publish_cross_instance("group:3", "{}").await.unwrap();
        assert_eq!(
            transport.0.lock().unwrap().as_slice(),
            &[("group:3".to_string(), "{}".to_string())]
        );
    }
}
