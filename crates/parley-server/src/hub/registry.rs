//! User → connections map owned by the hub task.
//!
//! The registry holds the only `Sender` for each connection's outbound
//! queue, so removing an entry is what closes the queue: the write loop
//! observes `None` from its receiver and shuts the socket down. Because
//! removal happens in exactly one place per entry, a queue is closed at
//! most once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use parley_core::{ConnectionId, Payload, UserId};

/// Why a connection was evicted during delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// The outbound queue was at capacity.
    QueueFull,
    /// The write loop had already gone away.
    QueueClosed,
}

impl EvictionReason {
    /// Label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::QueueClosed => "queue_closed",
        }
    }
}

impl<T> From<TrySendError<T>> for EvictionReason {
    fn from(e: TrySendError<T>) -> Self {
        match e {
            TrySendError::Full(_) => Self::QueueFull,
            TrySendError::Closed(_) => Self::QueueClosed,
        }
    }
}

/// A connection removed because a payload could not be enqueued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eviction {
    /// Owning user.
    pub user: UserId,
    /// Evicted connection.
    pub conn: ConnectionId,
    /// Why it was evicted.
    pub reason: EvictionReason,
}

/// Outcome of one delivery call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Queues the payload was placed on.
    pub delivered: usize,
    /// Connections dropped instead. The payload is not retried for them.
    pub evicted: Vec<Eviction>,
}

/// Point-in-time registry size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Users with at least one connection.
    pub users: usize,
    /// Registered connections.
    pub connections: usize,
}

/// Connection registry.
///
/// Invariants: no user maps to an empty set, and a connection is filed
/// under at most one user (`owners` mirrors `users`).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<Payload>>>,
    owners: HashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// File `conn` under `user`.
    ///
    /// Re-registering an existing connection ID replaces its queue (closing
    /// the old one) and moves it to `user` if it was filed elsewhere.
    pub fn register(&mut self, user: UserId, conn: ConnectionId, tx: mpsc::Sender<Payload>) {
        let _ = self.unregister(&conn);
        let _ = self
            .users
            .entry(user.clone())
            .or_default()
            .insert(conn.clone(), tx);
        let _ = self.owners.insert(conn, user);
    }

    /// Remove `conn`, closing its queue. Returns the owner if it was present.
    pub fn unregister(&mut self, conn: &ConnectionId) -> Option<UserId> {
        let user = self.owners.remove(conn)?;
        if let Some(conns) = self.users.get_mut(&user) {
            let _ = conns.remove(conn);
            if conns.is_empty() {
                let _ = self.users.remove(&user);
            }
        }
        Some(user)
    }

    /// Enqueue `payload` on every connection of `user`.
    pub fn deliver_to_user(&mut self, user: &UserId, payload: &Payload) -> Delivery {
        let mut out = Delivery::default();
        self.fan_out(user, payload, &mut out);
        out
    }

    /// Enqueue `payload` on a single connection.
    pub fn deliver_to_connection(&mut self, conn: &ConnectionId, payload: &Payload) -> Delivery {
        let mut out = Delivery::default();
        let Some(user) = self.owners.get(conn).cloned() else {
            return out;
        };
        let Some(tx) = self.users.get(&user).and_then(|c| c.get(conn)) else {
            return out;
        };
        match tx.try_send(Arc::clone(payload)) {
            Ok(()) => out.delivered += 1,
            Err(e) => {
                let _ = self.unregister(conn);
                out.evicted.push(Eviction {
                    user,
                    conn: conn.clone(),
                    reason: e.into(),
                });
            }
        }
        out
    }

    /// Enqueue `payload` for each of `members` registered here.
    pub fn deliver_to_members(&mut self, members: &HashSet<UserId>, payload: &Payload) -> Delivery {
        let mut out = Delivery::default();
        for user in members {
            if self.users.contains_key(user) {
                self.fan_out(user, payload, &mut out);
            }
        }
        out
    }

    /// Enqueue `payload` on every registered connection.
    pub fn deliver_to_all(&mut self, payload: &Payload) -> Delivery {
        let mut out = Delivery::default();
        let users: Vec<UserId> = self.users.keys().cloned().collect();
        for user in &users {
            self.fan_out(user, payload, &mut out);
        }
        out
    }

    /// Drop every entry, closing every queue. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        let closed = self.owners.len();
        self.users.clear();
        self.owners.clear();
        closed
    }

    /// Current size.
    pub fn stats(&self) -> HubStats {
        HubStats {
            users: self.users.len(),
            connections: self.owners.len(),
        }
    }

    /// Whether `conn` is registered under `user`.
    pub fn contains(&self, user: &UserId, conn: &ConnectionId) -> bool {
        self.users.get(user).is_some_and(|c| c.contains_key(conn))
    }

    fn fan_out(&mut self, user: &UserId, payload: &Payload, out: &mut Delivery) {
        let Some(conns) = self.users.get_mut(user) else {
            return;
        };
        let first_eviction = out.evicted.len();
        conns.retain(|conn, tx| match tx.try_send(Arc::clone(payload)) {
            Ok(()) => {
                out.delivered += 1;
                true
            }
            Err(e) => {
                out.evicted.push(Eviction {
                    user: user.clone(),
                    conn: conn.clone(),
                    reason: e.into(),
                });
                false
            }
        });
        if conns.is_empty() {
            let _ = self.users.remove(user);
        }
        for ev in &out.evicted[first_eviction..] {
            let _ = self.owners.remove(&ev.conn);
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut seen = HashSet::new();
        for (user, conns) in &self.users {
            assert!(!conns.is_empty(), "empty set under {user}");
            for conn in conns.keys() {
                assert!(seen.insert(conn.clone()), "{conn} filed twice");
                assert_eq!(self.owners.get(conn), Some(user));
            }
        }
        assert_eq!(seen.len(), self.owners.len());
    }
}
