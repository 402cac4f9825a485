//! Collaborator contracts consumed by the relay.
//!
//! The relay owns connection bookkeeping and fan-out only. Credential
//! checks, durable storage, membership, display names, and the shared
//! pub/sub transport are reached through these traits, always behind
//! `Arc<dyn _>`.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, StoreFailure, TransportError};
use crate::ids::{GroupId, MessageId, UserId};

/// A persisted direct message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    /// Row ID.
    pub id: MessageId,
    /// Sender.
    pub sender: UserId,
    /// Recipient.
    pub recipient: UserId,
    /// Body.
    pub body: String,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// When the recipient marked it read, if ever.
    pub read_at: Option<DateTime<Utc>>,
}

/// A persisted group message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Row ID.
    pub id: MessageId,
    /// Target group.
    pub group_id: GroupId,
    /// Sender.
    pub sender: UserId,
    /// Body.
    pub body: String,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

/// One message received from the pub/sub transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw payload (an encoded outbound frame).
    pub payload: String,
}

/// Subscription stream returned by [`PubSubTransport::subscribe`].
pub type TransportStream = Pin<Box<dyn Stream<Item = TransportMessage> + Send>>;

/// Validates bearer credentials presented at upgrade time.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    /// Resolve a token to the user it was issued for.
    async fn validate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a direct message. Enforces `sender != recipient`.
    async fn send_private(
        &self,
        sender: &UserId,
        recipient: &UserId,
        body: &str,
    ) -> Result<PrivateMessage, StoreFailure>;

    /// Persist a group message.
    async fn send_group(
        &self,
        group: GroupId,
        sender: &UserId,
        body: &str,
    ) -> Result<GroupMessage, StoreFailure>;
}

/// Answers group membership questions at delivery time. No caching is
/// assumed; answers may lag concurrent joins.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    /// Current member set of a group.
    async fn members(&self, group: GroupId) -> Result<HashSet<UserId>, StoreFailure>;

    /// Whether `user` belongs to `group`.
    async fn is_member(&self, group: GroupId, user: &UserId) -> Result<bool, StoreFailure>;
}

/// Resolves a user's display identity.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Display name for `user`, or `None` when the user has none.
    async fn display_name_of(&self, user: &UserId) -> Result<Option<String>, StoreFailure>;
}

/// Shared publish/subscribe transport spanning every server instance.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError>;

    /// Subscribe to every channel matching one of `patterns` (trailing `*` glob).
    async fn subscribe(&self, patterns: &[&str]) -> Result<TransportStream, TransportError>;
}
