//! Error types for collaborator failures.
//!
//! These never reach the wire verbatim: the relay maps every failure onto
//! a fixed [`ErrorCode`](crate::wire::ErrorCode) and logs the detail.

use thiserror::Error;

/// Bearer-credential validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,
    /// The credential could not be parsed or verified.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The credential verified but carries no subject.
    #[error("token has no subject")]
    MissingSubject,
}

/// Failure reported by a persistence, membership, or identity collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// The request was refused (e.g. sending a message to yourself).
    #[error("rejected: {0}")]
    Rejected(String),
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The backing store is unavailable or returned an error.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Pub/sub transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect to, or lost the connection to, the transport.
    #[error("transport connection failed: {0}")]
    Connection(String),
    /// A publish was not accepted.
    #[error("publish to {channel} failed: {message}")]
    Publish {
        /// Target channel.
        channel: String,
        /// Underlying error text.
        message: String,
    },
    /// A subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}
