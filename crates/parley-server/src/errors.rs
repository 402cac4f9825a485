//! Server error type.

use parley_core::TransportError;

/// Errors raised by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pub/sub transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The hub task has stopped; no further commands are accepted.
    #[error("hub is not running")]
    HubClosed,
}
