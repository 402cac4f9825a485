//! Private and group message repos.
//!
//! Both list operations return newest-first and page backwards with
//! `before`, an exclusive upper bound on the message ID.

use chrono::Utc;
use rusqlite::Row;
use rusqlite::types::Value;
use tracing::instrument;

use parley_core::collab::{GroupMessage, PrivateMessage};
use parley_core::{GroupId, MessageId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{format_ts, parse_opt_ts, parse_ts, row_id, sql_id};

const CONVERSATION_DEFAULT_LIMIT: i64 = 50;
const CONVERSATION_MAX_LIMIT: i64 = 100;
const GROUP_DEFAULT_LIMIT: i64 = 100;
const GROUP_MAX_LIMIT: i64 = 200;

/// Out-of-range limits fall back to the default rather than clamping.
fn effective_limit(requested: i64, default: i64, max: i64) -> i64 {
    if requested <= 0 || requested > max {
        default
    } else {
        requested
    }
}

fn before_bound(before: Option<MessageId>) -> rusqlite::Result<i64> {
    match before {
        Some(id) if id.get() > 0 => sql_id(id.get()),
        _ => Ok(i64::MAX),
    }
}

fn map_private(row: &Row<'_>) -> rusqlite::Result<PrivateMessage> {
    Ok(PrivateMessage {
        id: MessageId::new(row_id(0, row.get(0)?)?),
        sender: UserId::from_string(row.get::<_, String>(1)?),
        recipient: UserId::from_string(row.get::<_, String>(2)?),
        body: row.get(3)?,
        created_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        read_at: parse_opt_ts(5, row.get(5)?)?,
    })
}

fn map_group_message(row: &Row<'_>) -> rusqlite::Result<GroupMessage> {
    Ok(GroupMessage {
        id: MessageId::new(row_id(0, row.get(0)?)?),
        group_id: GroupId::new(row_id(1, row.get(1)?)?),
        sender: UserId::from_string(row.get::<_, String>(2)?),
        body: row.get(3)?,
        created_at: parse_ts(4, &row.get::<_, String>(4)?)?,
    })
}

/// Direct messages between two users.
pub struct PrivateMessageRepo {
    db: Database,
}

impl PrivateMessageRepo {
    /// Wrap a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a direct message.
    ///
    /// Sending to yourself or sending an empty body is rejected.
    #[instrument(skip(self, body), fields(sender = %sender, recipient = %recipient))]
    pub fn send(
        &self,
        sender: &UserId,
        recipient: &UserId,
        body: &str,
    ) -> Result<PrivateMessage, StoreError> {
        if sender == recipient {
            return Err(StoreError::Rejected("cannot send to self".into()));
        }
        if body.is_empty() {
            return Err(StoreError::Rejected("body must not be empty".into()));
        }
        self.db.with_conn(|conn| {
            let now = Utc::now();
            let _ = conn.execute(
                "INSERT INTO private_messages (sender_id, recipient_id, body, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender.as_str(), recipient.as_str(), body, format_ts(now)],
            )?;
            Ok(PrivateMessage {
                id: MessageId::new(row_id(0, conn.last_insert_rowid())?),
                sender: sender.clone(),
                recipient: recipient.clone(),
                body: body.to_string(),
                created_at: now,
                read_at: None,
            })
        })
    }

    /// Messages exchanged between `user` and `other`, in either direction.
    ///
    /// `limit` outside `1..=100` means 50.
    #[instrument(skip(self), fields(user = %user, other = %other))]
    pub fn list_conversation(
        &self,
        user: &UserId,
        other: &UserId,
        limit: i64,
        before: Option<MessageId>,
    ) -> Result<Vec<PrivateMessage>, StoreError> {
        let limit = effective_limit(limit, CONVERSATION_DEFAULT_LIMIT, CONVERSATION_MAX_LIMIT);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, body, created_at, read_at \
                 FROM private_messages \
                 WHERE ((sender_id = ?1 AND recipient_id = ?2) \
                     OR (sender_id = ?2 AND recipient_id = ?1)) \
                   AND id < ?3 \
                 ORDER BY id DESC LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user.as_str(), other.as_str(), before_bound(before)?, limit],
                    map_private,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark messages from `sender` to `recipient` as read.
    ///
    /// Only rows addressed to `recipient`, sent by `sender`, and not yet
    /// read are touched. Returns how many rows changed.
    #[instrument(skip(self, ids), fields(recipient = %recipient, sender = %sender, count = ids.len()))]
    pub fn mark_read(
        &self,
        recipient: &UserId,
        sender: &UserId,
        ids: &[MessageId],
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            let placeholders = (0..ids.len())
                .map(|i| format!("?{}", i + 4))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE private_messages SET read_at = ?1 \
                 WHERE recipient_id = ?2 AND sender_id = ?3 \
                   AND id IN ({placeholders}) AND read_at IS NULL"
            );

            let mut params = vec![
                Value::Text(format_ts(Utc::now())),
                Value::Text(recipient.to_string()),
                Value::Text(sender.to_string()),
            ];
            for id in ids {
                params.push(Value::Integer(sql_id(id.get())?));
            }
            Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?)
        })
    }
}

/// Messages posted to groups.
pub struct GroupMessageRepo {
    db: Database,
}

impl GroupMessageRepo {
    /// Wrap a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a group message. The group must exist.
    #[instrument(skip(self, body), fields(group_id = %group, sender = %sender))]
    pub fn send(
        &self,
        group: GroupId,
        sender: &UserId,
        body: &str,
    ) -> Result<GroupMessage, StoreError> {
        if body.is_empty() {
            return Err(StoreError::Rejected("body must not be empty".into()));
        }
        self.db.with_conn(|conn| {
            let now = Utc::now();
            let inserted = conn.execute(
                "INSERT INTO group_messages (group_id, sender_id, body, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sql_id(group.get())?, sender.as_str(), body, format_ts(now)],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                {
                    return Err(StoreError::NotFound(format!("group {group}")));
                }
                Err(e) => return Err(e.into()),
            }
            Ok(GroupMessage {
                id: MessageId::new(row_id(0, conn.last_insert_rowid())?),
                group_id: group,
                sender: sender.clone(),
                body: body.to_string(),
                created_at: now,
            })
        })
    }

    /// Messages in `group`. `limit` outside `1..=200` means 100.
    #[instrument(skip(self), fields(group_id = %group))]
    pub fn list(
        &self,
        group: GroupId,
        limit: i64,
        before: Option<MessageId>,
    ) -> Result<Vec<GroupMessage>, StoreError> {
        let limit = effective_limit(limit, GROUP_DEFAULT_LIMIT, GROUP_MAX_LIMIT);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, group_id, sender_id, body, created_at \
                 FROM group_messages \
                 WHERE group_id = ?1 AND id < ?2 \
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![sql_id(group.get())?, before_bound(before)?, limit],
                    map_group_message,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
