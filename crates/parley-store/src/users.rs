use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use parley_core::UserId;

use crate::database::Database;
use crate::error::{StoreError, is_unique_violation};
use crate::row_helpers::{format_ts, parse_ts};

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    /// Opaque user ID (16 hex characters).
    pub id: UserId,
    /// Unique email address, also used as the display name.
    pub email: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: UserId::from_string(row.get::<_, String>(0)?),
        email: row.get(1)?,
        created_at: parse_ts(2, &row.get::<_, String>(2)?)?,
    })
}

/// Generate an ID from 8 random bytes, hex-encoded.
fn generate_user_id() -> UserId {
    let bytes: [u8; 8] = rand::random();
    let mut id = String::with_capacity(16);
    for b in bytes {
        let _ = write!(id, "{b:02x}");
    }
    UserId::from_string(id)
}

/// User accounts.
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    /// Wrap a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a user. Fails with [`StoreError::Conflict`] if the email is taken.
    #[instrument(skip(self))]
    pub fn create(&self, email: &str) -> Result<UserRow, StoreError> {
        if email.trim().is_empty() {
            return Err(StoreError::Rejected("email must not be empty".into()));
        }
        self.db.with_conn(|conn| {
            let id = generate_user_id();
            let now = Utc::now();
            let inserted = conn.execute(
                "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), email, format_ts(now)],
            );
            match inserted {
                Ok(_) => Ok(UserRow {
                    id,
                    email: email.to_string(),
                    created_at: now,
                }),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::Conflict(format!("user {email} already exists")))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Fetch a user by ID.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    /// Fetch a user by ID, `None` when absent.
    pub fn find(&self, id: &UserId) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, email, created_at FROM users WHERE id = ?1",
                    [id.as_str()],
                    map_user,
                )
                .optional()?)
        })
    }

    /// Fetch a user by email.
    #[instrument(skip(self))]
    pub fn get_by_email(&self, email: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, created_at FROM users WHERE email = ?1",
                [email],
                map_user,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {email}")))
        })
    }
}
