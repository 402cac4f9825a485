//! Conversions between SQLite column values and domain types.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

/// Render a timestamp for storage.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp from column `idx`.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse an optional stored timestamp from column `idx`.
pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

/// Convert an `INTEGER PRIMARY KEY` from column `idx` into an unsigned ID.
pub(crate) fn row_id(idx: usize, raw: i64) -> rusqlite::Result<u64> {
    u64::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// Convert an unsigned ID into a bindable SQLite integer.
pub(crate) fn sql_id(raw: u64) -> rusqlite::Result<i64> {
    i64::try_from(raw).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}
