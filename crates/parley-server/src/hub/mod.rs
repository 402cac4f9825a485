//! Dispatch hub: a single task owning the connection registry, driven by
//! commands sent through [`HubHandle`].

mod actor;
mod handle;
pub mod registry;

pub use actor::Hub;
pub use handle::HubHandle;
pub use registry::{ConnectionRegistry, Delivery, Eviction, EvictionReason, HubStats};
