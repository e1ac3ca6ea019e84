//! Event log queries
//!
//! Rows are returned raw (`StoredEvent`); decoding payloads into typed
//! variants is the event store's job.

use super::{parse_ts, ts, Database};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

/// An event row as stored
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event_id: String,
    pub instance_id: String,
    pub event_type: String,
    pub sequence_num: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub parent_event_id: Option<String>,
}

/// Everything needed to append one event except its sequence number
#[derive(Debug, Clone)]
pub struct NewEventRow<'a> {
    pub event_id: &'a str,
    pub instance_id: &'a str,
    pub event_type: &'a str,
    pub timestamp: DateTime<Utc>,
    pub payload: &'a str,
    pub metadata: Option<&'a str>,
    /// Explicit causal parent; `None` links to the instance's previous event
    pub parent_event_id: Option<&'a str>,
}

/// Filters for [`Database::query_events`]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Match any of these types (empty = all)
    pub types: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Substring match over type, payload and metadata
    pub keyword: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Per-type rollup for one instance
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAggregate {
    pub event_type: String,
    pub count: i64,
    pub first_sequence: i64,
    pub last_sequence: i64,
    pub last_timestamp: DateTime<Utc>,
}

impl Database {
    /// Append an event, allocating `max(sequence_num) + 1` for the instance.
    ///
    /// Read-then-insert runs in one immediate transaction on the single
    /// connection, which holds for one writer per instance.
    /// Returns `(sequence_num, parent_event_id)`.
    pub fn insert_event_next_seq(&self, row: &NewEventRow<'_>) -> Result<(i64, Option<String>)> {
        let mut conn = self.connection();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Error::storage("begin event insert"))?;

        let previous: Option<(i64, String)> = tx
            .query_row(
                r#"
                SELECT sequence_num, event_id FROM events
                WHERE instance_id = ?
                ORDER BY sequence_num DESC
                LIMIT 1
                "#,
                [row.instance_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(Error::storage("read event sequence"))?;

        let sequence_num = previous.as_ref().map(|(seq, _)| seq + 1).unwrap_or(1);
        let parent = row
            .parent_event_id
            .map(str::to_string)
            .or_else(|| previous.map(|(_, id)| id));

        tx.execute(
            r#"
            INSERT INTO events (event_id, instance_id, event_type, sequence_num, timestamp,
                                payload, metadata, parent_event_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                row.event_id,
                row.instance_id,
                row.event_type,
                sequence_num,
                ts(row.timestamp),
                row.payload,
                row.metadata,
                parent,
            ],
        )
        .map_err(Error::storage("insert event"))?;

        tx.commit().map_err(Error::storage("commit event insert"))?;
        Ok((sequence_num, parent))
    }

    /// Filtered page of events in ascending sequence order, plus the total match count
    pub fn query_events(
        &self,
        instance_id: &str,
        filter: &EventFilter,
    ) -> Result<(Vec<StoredEvent>, i64)> {
        let conn = self.connection();

        let mut where_sql = String::from("WHERE instance_id = ?");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(instance_id.to_string())];

        if !filter.types.is_empty() {
            let placeholders = vec!["?"; filter.types.len()].join(", ");
            where_sql.push_str(&format!(" AND event_type IN ({})", placeholders));
            for t in &filter.types {
                params.push(Box::new(t.clone()));
            }
        }

        if let Some(since) = filter.since {
            where_sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(ts(since)));
        }

        if let Some(until) = filter.until {
            where_sql.push_str(" AND timestamp <= ?");
            params.push(Box::new(ts(until)));
        }

        if let Some(keyword) = filter.keyword.as_deref().filter(|k| !k.is_empty()) {
            where_sql.push_str(
                r" AND (event_type LIKE ? ESCAPE '\' OR payload LIKE ? ESCAPE '\'
                   OR COALESCE(metadata, '') LIKE ? ESCAPE '\')",
            );
            let pattern = format!("%{}%", escape_like(keyword));
            for _ in 0..3 {
                params.push(Box::new(pattern.clone()));
            }
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM events {}", where_sql),
                params_refs.as_slice(),
                |r| r.get(0),
            )
            .map_err(Error::storage("count events"))?;

        let sql = format!(
            "SELECT * FROM events {} ORDER BY sequence_num ASC LIMIT {} OFFSET {}",
            where_sql, filter.limit, filter.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_refs.as_slice(), Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("query events"))?;

        Ok((events, total))
    }

    /// All events for an instance up to (and including) `up_to`, ascending
    pub fn events_up_to(&self, instance_id: &str, up_to: Option<i64>) -> Result<Vec<StoredEvent>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM events
            WHERE instance_id = ?1 AND sequence_num <= ?2
            ORDER BY sequence_num ASC
            "#,
        )?;
        let events = stmt
            .query_map(params![instance_id, up_to.unwrap_or(i64::MAX)], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("load events"))?;
        Ok(events)
    }

    /// The newest `n` events, returned in ascending sequence order
    pub fn latest_events(&self, instance_id: &str, n: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM (
                SELECT * FROM events
                WHERE instance_id = ?1
                ORDER BY sequence_num DESC
                LIMIT ?2
            ) ORDER BY sequence_num ASC
            "#,
        )?;
        let events = stmt
            .query_map(params![instance_id, n as i64], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("load latest events"))?;
        Ok(events)
    }

    /// Newest event of the given type
    pub fn latest_event_of_type(
        &self,
        instance_id: &str,
        event_type: &str,
    ) -> Result<Option<StoredEvent>> {
        let conn = self.connection();
        conn.query_row(
            r#"
            SELECT * FROM events
            WHERE instance_id = ?1 AND event_type = ?2
            ORDER BY sequence_num DESC
            LIMIT 1
            "#,
            params![instance_id, event_type],
            Self::row_to_event,
        )
        .optional()
        .map_err(Error::storage("latest event of type"))
    }

    /// Get an event by ID
    pub fn get_event(&self, event_id: &str) -> Result<Option<StoredEvent>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM events WHERE event_id = ?",
            [event_id],
            Self::row_to_event,
        )
        .optional()
        .map_err(Error::storage("get event"))
    }

    pub fn count_events(&self, instance_id: &str) -> Result<i64> {
        let conn = self.connection();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE instance_id = ?",
                [instance_id],
                |r| r.get(0),
            )
            .map_err(Error::storage("count events"))?;
        Ok(count)
    }

    /// Count, first/last sequence and last timestamp per event type
    pub fn aggregate_events_by_type(&self, instance_id: &str) -> Result<Vec<TypeAggregate>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT event_type,
                   COUNT(*) as count,
                   MIN(sequence_num) as first_seq,
                   MAX(sequence_num) as last_seq,
                   MAX(timestamp) as last_ts
            FROM events
            WHERE instance_id = ?
            GROUP BY event_type
            ORDER BY count DESC, event_type ASC
            "#,
        )?;

        let rows = stmt
            .query_map([instance_id], |row| {
                let last_ts: String = row.get(4)?;
                Ok(TypeAggregate {
                    event_type: row.get(0)?,
                    count: row.get(1)?,
                    first_sequence: row.get(2)?,
                    last_sequence: row.get(3)?,
                    last_timestamp: parse_ts(&last_ts),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("aggregate events"))?;

        Ok(rows)
    }

    /// Delete every event of an instance. Returns rows deleted.
    pub fn delete_events(&self, instance_id: &str) -> Result<usize> {
        let conn = self.connection();
        conn.execute("DELETE FROM events WHERE instance_id = ?", [instance_id])
            .map_err(Error::storage("delete events"))
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<StoredEvent> {
        let timestamp_str: String = row.get("timestamp")?;
        let payload_str: String = row.get("payload")?;
        let metadata_str: Option<String> = row.get("metadata")?;

        Ok(StoredEvent {
            event_id: row.get("event_id")?,
            instance_id: row.get("instance_id")?,
            event_type: row.get("event_type")?,
            sequence_num: row.get("sequence_num")?,
            timestamp: parse_ts(&timestamp_str),
            payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::json!({})),
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            parent_event_id: row.get("parent_event_id")?,
        })
    }
}

/// Escape `LIKE` wildcards so a keyword matches literally
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
