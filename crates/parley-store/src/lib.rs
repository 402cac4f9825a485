//! # parley-store
//!
//! SQLite persistence for users, groups, membership, and messages. The
//! repos are synchronous; [`SqliteChatStore`] adapts them to the relay's
//! async collaborator traits.

#![deny(unsafe_code)]

pub mod chat_store;
pub mod database;
pub mod error;
pub mod groups;
pub mod messages;
mod row_helpers;
pub mod schema;
pub mod users;

pub use chat_store::SqliteChatStore;
pub use database::Database;
pub use error::StoreError;
pub use groups::{GroupRepo, GroupRow};
pub use messages::{GroupMessageRepo, PrivateMessageRepo};
pub use users::{UserRepo, UserRow};
