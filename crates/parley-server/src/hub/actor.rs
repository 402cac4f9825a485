use std::collections::HashSet;
use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_core::collab::{MembershipResolver, PubSubTransport};
use parley_core::{ConnectionId, Payload, UserId};
use parley_settings::MembershipFallback;

use super::handle::HubHandle;
use super::registry::{ConnectionRegistry, Delivery, HubStats};
use crate::metrics::{EVICTIONS_TOTAL, WS_CONNECTIONS_ACTIVE};

/// Messages processed by the hub task, one at a time.
pub(crate) enum Command {
    Register {
        user: UserId,
        conn: ConnectionId,
        tx: mpsc::Sender<Payload>,
    },
    Unregister {
        conn: ConnectionId,
    },
    DeliverToUser {
        user: UserId,
        payload: Payload,
    },
    DeliverToConnection {
        conn: ConnectionId,
        payload: Payload,
    },
    DeliverToMembers {
        members: HashSet<UserId>,
        payload: Payload,
    },
    DeliverToAll {
        payload: Payload,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown,
}

/// The dispatch actor.
///
/// Every registry mutation happens inside [`Hub::run`]; nothing else can
/// reach the map. Delivery never awaits a queue: a full or closed queue
/// evicts its connection on the spot.
pub struct Hub {
    registry: ConnectionRegistry,
    rx: mpsc::Receiver<Command>,
}

impl Hub {
    /// Spawn the hub task and return a handle to it.
    pub fn spawn(
        mailbox_capacity: usize,
        membership: Arc<dyn MembershipResolver>,
        transport: Arc<dyn PubSubTransport>,
        fallback: MembershipFallback,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity);
        let hub = Self {
            registry: ConnectionRegistry::new(),
            rx,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle::new(tx, membership, transport, fallback), task)
    }

    async fn run(mut self) {
        debug!("hub started");
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register { user, conn, tx } => {
                    debug!(user_id = %user, conn_id = %conn, "register");
                    self.registry.register(user, conn, tx);
                    self.publish_gauge();
                }
                Command::Unregister { conn } => {
                    if let Some(user) = self.registry.unregister(&conn) {
                        debug!(user_id = %user, conn_id = %conn, "unregister");
                        self.publish_gauge();
                    }
                }
                Command::DeliverToUser { user, payload } => {
                    let d = self.registry.deliver_to_user(&user, &payload);
                    self.after_delivery(&d);
                }
                Command::DeliverToConnection { conn, payload } => {
                    let d = self.registry.deliver_to_connection(&conn, &payload);
                    self.after_delivery(&d);
                }
                Command::DeliverToMembers { members, payload } => {
                    let d = self.registry.deliver_to_members(&members, &payload);
                    debug!(members = members.len(), delivered = d.delivered, "group fan-out");
                    self.after_delivery(&d);
                }
                Command::DeliverToAll { payload } => {
                    let d = self.registry.deliver_to_all(&payload);
                    self.after_delivery(&d);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.registry.stats());
                }
                Command::Shutdown => {
                    let closed = self.registry.close_all();
                    self.publish_gauge();
                    info!(closed, "hub shutting down");
                    break;
                }
            }
        }
        debug!("hub stopped");
    }

    fn after_delivery(&self, delivery: &Delivery) {
        if delivery.evicted.is_empty() {
            return;
        }
        for ev in &delivery.evicted {
            warn!(
                user_id = %ev.user,
                conn_id = %ev.conn,
                reason = ev.reason.as_str(),
                "evicting slow connection"
            );
        }
        counter!(EVICTIONS_TOTAL).increment(delivery.evicted.len() as u64);
        self.publish_gauge();
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_gauge(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.registry.stats().connections as f64);
    }
}
