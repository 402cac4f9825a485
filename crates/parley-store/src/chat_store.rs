//! Collaborator adapter over the SQLite repos.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::warn;

use parley_core::collab::{
    GroupMessage, IdentityLookup, MembershipResolver, MessageStore, PrivateMessage,
};
use parley_core::{GroupId, StoreFailure, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::groups::GroupRepo;
use crate::messages::{GroupMessageRepo, PrivateMessageRepo};
use crate::users::UserRepo;

/// SQLite-backed implementation of the relay's storage, membership, and
/// identity collaborators. Display names are user emails.
#[derive(Clone)]
pub struct SqliteChatStore {
    db: Database,
}

impl SqliteChatStore {
    /// Wrap a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run a repo call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreFailure>
    where
        T: Send + 'static,
        F: FnOnce(Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || f(db)).await {
            Ok(result) => result.map_err(|e| {
                warn!(error = %e, "store call failed");
                StoreFailure::from(e)
            }),
            Err(e) => Err(StoreFailure::Unavailable(format!("store task failed: {e}"))),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteChatStore {
    async fn send_private(
        &self,
        sender: &UserId,
        recipient: &UserId,
        body: &str,
    ) -> Result<PrivateMessage, StoreFailure> {
        let (sender, recipient, body) = (sender.clone(), recipient.clone(), body.to_string());
        self.blocking(move |db| PrivateMessageRepo::new(db).send(&sender, &recipient, &body))
            .await
    }

    async fn send_group(
        &self,
        group: GroupId,
        sender: &UserId,
        body: &str,
    ) -> Result<GroupMessage, StoreFailure> {
        let (sender, body) = (sender.clone(), body.to_string());
        self.blocking(move |db| GroupMessageRepo::new(db).send(group, &sender, &body))
            .await
    }
}

#[async_trait]
impl MembershipResolver for SqliteChatStore {
    async fn members(&self, group: GroupId) -> Result<HashSet<UserId>, StoreFailure> {
        self.blocking(move |db| GroupRepo::new(db).members(group)).await
    }

    async fn is_member(&self, group: GroupId, user: &UserId) -> Result<bool, StoreFailure> {
        let user = user.clone();
        self.blocking(move |db| GroupRepo::new(db).is_member(group, &user))
            .await
    }
}

#[async_trait]
impl IdentityLookup for SqliteChatStore {
    async fn display_name_of(&self, user: &UserId) -> Result<Option<String>, StoreFailure> {
        let user = user.clone();
        self.blocking(move |db| Ok(UserRepo::new(db).find(&user)?.map(|u| u.email)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteChatStore {
        SqliteChatStore::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn private_self_send_is_rejected() {
        let store = store();
        let me = UserId::from("me");
        let err = store.send_private(&me, &me, "hi").await.unwrap_err();
        assert!(matches!(err, StoreFailure::Rejected(_)));
    }

    #[tokio::test]
    async fn membership_reflects_joins() {
        let store = store();
        let group = GroupRepo::new(store.database().clone())
            .create("g", &UserId::from("owner"))
            .unwrap();
        GroupRepo::new(store.database().clone())
            .join(group.id, &UserId::from("guest"))
            .unwrap();

        let members = store.members(group.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(store.is_member(group.id, &UserId::from("guest")).await.unwrap());
        assert!(!store.is_member(group.id, &UserId::from("stranger")).await.unwrap());
    }

    #[tokio::test]
    async fn display_name_is_email() {
        let store = store();
        let user = UserRepo::new(store.database().clone())
            .create("ada@example.com")
            .unwrap();
        assert_eq!(
            store.display_name_of(&user.id).await.unwrap().as_deref(),
            Some("ada@example.com")
        );
        assert_eq!(store.display_name_of(&UserId::from("ghost")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn group_send_persists() {
        let store = store();
        let owner = UserId::from("owner");
        let group = GroupRepo::new(store.database().clone())
            .create("g", &owner)
            .unwrap();
        let msg = store.send_group(group.id, &owner, "hello").await.unwrap();
        assert_eq!(msg.group_id, group.id);
        assert_eq!(msg.body, "hello");
    }
}
