//! # parley-core
//!
//! Foundation types shared by every Parley crate:
//!
//! - **Branded IDs**: [`UserId`], [`ConnectionId`], [`GroupId`], [`MessageId`]
//! - **Wire codec**: inbound [`Envelope`] decoding and outbound [`OutboundFrame`] encoding
//! - **Channels**: pub/sub channel naming for cross-instance fan-out
//! - **Collaborators**: async traits the relay calls into (auth, persistence,
//!   membership, identity lookup, pub/sub transport)
//! - **Errors**: `thiserror` enums for collaborator and codec failures

#![deny(unsafe_code)]

pub mod channel;
pub mod collab;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod wire;

pub use channel::Channel;
pub use errors::{AuthError, StoreFailure, TransportError};
pub use ids::{ConnectionId, GroupId, MessageId, UserId};
pub use wire::{Envelope, ErrorCode, OutboundFrame, Payload};
