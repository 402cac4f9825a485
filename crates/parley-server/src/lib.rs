//! # parley-server
//!
//! Real-time delivery core of the Parley chat relay.
//!
//! - [`hub`]: the dispatch actor owning the user → connections registry
//! - [`websocket`]: per-connection inbound/outbound pump pair
//! - [`bridge`]: cross-instance fan-out over a pub/sub transport
//! - [`server`]: axum router (`/ws`, `/health`, `/metrics`) and listener
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use hub::{Hub, HubHandle, HubStats};
pub use server::{ParleyServer, Services};
