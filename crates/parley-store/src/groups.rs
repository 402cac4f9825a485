use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::{GroupId, UserId};

use crate::database::Database;
use crate::error::{StoreError, is_unique_violation};
use crate::row_helpers::{format_ts, parse_ts, row_id, sql_id};

/// A chat group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    /// Row ID; never zero.
    pub id: GroupId,
    /// Unique group name.
    pub name: String,
    /// Creating user, always a member.
    pub owner_id: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn map_group(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: GroupId::new(row_id(0, row.get(0)?)?),
        name: row.get(1)?,
        owner_id: UserId::from_string(row.get::<_, String>(2)?),
        created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
    })
}

/// Groups and their membership.
pub struct GroupRepo {
    db: Database,
}

impl GroupRepo {
    /// Wrap a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a group and enrol its owner in the same transaction.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn create(&self, name: &str, owner: &UserId) -> Result<GroupRow, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let now_str = format_ts(now);

            match tx.execute(
                "INSERT INTO groups (name, owner_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, owner.as_str(), now_str],
            ) {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::Conflict(format!("group {name} already exists")));
                }
                Err(e) => return Err(e.into()),
            }
            let id = row_id(0, tx.last_insert_rowid())?;

            let _ = tx.execute(
                "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![sql_id(id)?, owner.as_str(), now_str],
            )?;
            tx.commit()?;

            Ok(GroupRow {
                id: GroupId::new(id),
                name: name.to_string(),
                owner_id: owner.clone(),
                created_at: now,
            })
        })
    }

    /// Fetch a group by ID.
    #[instrument(skip(self), fields(group_id = %id))]
    pub fn get(&self, id: GroupId) -> Result<GroupRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, owner_id, created_at FROM groups WHERE id = ?1",
                [sql_id(id.get())?],
                map_group,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("group {id}")))
        })
    }

    /// Add `user` to `group`. Joining twice is a no-op.
    #[instrument(skip(self), fields(group_id = %group, user_id = %user))]
    pub fn join(&self, group: GroupId, user: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let gid = sql_id(group.get())?;
            let exists: Option<i64> = conn
                .query_row("SELECT id FROM groups WHERE id = ?1", [gid], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("group {group}")));
            }
            let _ = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) \
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![gid, user.as_str(), format_ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Current member set. Empty for an unknown group.
    #[instrument(skip(self), fields(group_id = %group))]
    pub fn members(&self, group: GroupId) -> Result<HashSet<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
            let members = stmt
                .query_map([sql_id(group.get())?], |row| {
                    row.get::<_, String>(0).map(UserId::from_string)
                })?
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(members)
        })
    }

    /// Whether `user` belongs to `group`.
    pub fn is_member(&self, group: GroupId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    rusqlite::params![sql_id(group.get())?, user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}
