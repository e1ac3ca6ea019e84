//! Database layer for tether
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries (one file per table family)
//! - Fixed-width RFC 3339 timestamps so text ordering equals time ordering

pub mod checkpoints;
pub mod commands;
pub mod events;
pub mod repo;
pub mod schema;

pub use checkpoints::NewCheckpointRow;
pub use events::{EventFilter, NewEventRow, StoredEvent, TypeAggregate};
pub use repo::Database;

use chrono::{DateTime, SecondsFormat, Utc};

/// Encode a timestamp for storage.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored timestamp, falling back to now for corrupt rows.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
