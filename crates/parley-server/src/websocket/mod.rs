//! Per-connection pump pair: the inline read loop and the spawned write loop.

pub mod inbound;
pub mod session;

pub use inbound::{SessionContext, handle_frame};
pub use session::run_ws_session;
