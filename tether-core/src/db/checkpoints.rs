//! Checkpoint queries

use super::{parse_ts, ts, Database};
use crate::error::{Error, Result};
use crate::types::{Checkpoint, CheckpointMetadata, CheckpointSummary, CheckpointType, WorkState};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

/// A checkpoint ready to insert, minus its sequence number
#[derive(Debug, Clone)]
pub struct NewCheckpointRow<'a> {
    pub checkpoint_id: &'a str,
    pub instance_id: &'a str,
    pub checkpoint_type: CheckpointType,
    pub context_percent: Option<u8>,
    pub work_state: &'a str,
    pub metadata: &'a str,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Insert a checkpoint with the next per-instance sequence number.
    ///
    /// The counter is independent of event sequence numbers.
    pub fn insert_checkpoint_next_seq(&self, row: &NewCheckpointRow<'_>) -> Result<i64> {
        let mut conn = self.connection();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Error::storage("begin checkpoint insert"))?;

        let sequence_num: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence_num), 0) + 1 FROM checkpoints WHERE instance_id = ?",
                [row.instance_id],
                |r| r.get(0),
            )
            .map_err(Error::storage("read checkpoint sequence"))?;

        tx.execute(
            r#"
            INSERT INTO checkpoints (checkpoint_id, instance_id, checkpoint_type, sequence_num,
                                     context_percent, work_state, metadata, size_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                row.checkpoint_id,
                row.instance_id,
                row.checkpoint_type.as_str(),
                sequence_num,
                row.context_percent,
                row.work_state,
                row.metadata,
                row.size_bytes as i64,
                ts(row.created_at),
            ],
        )
        .map_err(Error::storage("insert checkpoint"))?;

        tx.commit().map_err(Error::storage("commit checkpoint insert"))?;
        Ok(sequence_num)
    }

    /// Get a checkpoint by ID
    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM checkpoints WHERE checkpoint_id = ?",
            [checkpoint_id],
            Self::row_to_checkpoint,
        )
        .optional()
        .map_err(Error::storage("get checkpoint"))
    }

    /// The newest checkpoint of an instance
    pub fn latest_checkpoint(&self, instance_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.connection();
        conn.query_row(
            r#"
            SELECT * FROM checkpoints
            WHERE instance_id = ?
            ORDER BY created_at DESC, sequence_num DESC
            LIMIT 1
            "#,
            [instance_id],
            Self::row_to_checkpoint,
        )
        .optional()
        .map_err(Error::storage("get latest checkpoint"))
    }

    /// Page of checkpoint summaries, newest first
    pub fn list_checkpoints(
        &self,
        instance_id: &str,
        checkpoint_type: Option<CheckpointType>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CheckpointSummary>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT checkpoint_id, checkpoint_type, sequence_num, context_percent,
                   json_extract(work_state, '$.current_task.name') as task_name,
                   size_bytes, created_at
            FROM checkpoints
            WHERE instance_id = ?1 AND (?2 IS NULL OR checkpoint_type = ?2)
            ORDER BY sequence_num DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )?;

        let summaries = stmt
            .query_map(
                params![
                    instance_id,
                    checkpoint_type.map(|t| t.as_str()),
                    limit as i64,
                    offset as i64
                ],
                |row| {
                    let type_str: String = row.get(1)?;
                    let context_percent: Option<i64> = row.get(3)?;
                    let size_bytes: i64 = row.get(5)?;
                    let created_at_str: String = row.get(6)?;
                    Ok(CheckpointSummary {
                        checkpoint_id: row.get(0)?,
                        checkpoint_type: type_str.parse().unwrap_or(CheckpointType::Manual),
                        sequence_num: row.get(2)?,
                        context_percent: context_percent.map(|p| p.clamp(0, 100) as u8),
                        task_name: row.get(4)?,
                        size_bytes: size_bytes.max(0) as u64,
                        created_at: parse_ts(&created_at_str),
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("list checkpoints"))?;

        Ok(summaries)
    }

    /// Total checkpoints matching the listing filter
    pub fn count_checkpoints(
        &self,
        instance_id: &str,
        checkpoint_type: Option<CheckpointType>,
    ) -> Result<i64> {
        let conn = self.connection();
        let count: i64 = conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM checkpoints
                WHERE instance_id = ?1 AND (?2 IS NULL OR checkpoint_type = ?2)
                "#,
                params![instance_id, checkpoint_type.map(|t| t.as_str())],
                |r| r.get(0),
            )
            .map_err(Error::storage("count checkpoints"))?;
        Ok(count)
    }

    /// Delete checkpoints created strictly before `cutoff`.
    ///
    /// Returns `(rows_deleted, sum_of_recorded_size_bytes)`.
    pub fn delete_checkpoints_before(&self, cutoff: DateTime<Utc>) -> Result<(usize, u64)> {
        let mut conn = self.connection();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Error::storage("begin checkpoint cleanup"))?;

        let cutoff = ts(cutoff);
        let bytes: i64 = tx
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM checkpoints WHERE created_at < ?",
                [&cutoff],
                |r| r.get(0),
            )
            .map_err(Error::storage("measure expired checkpoints"))?;

        let deleted = tx
            .execute("DELETE FROM checkpoints WHERE created_at < ?", [&cutoff])
            .map_err(Error::storage("delete expired checkpoints"))?;

        tx.commit().map_err(Error::storage("commit checkpoint cleanup"))?;
        Ok((deleted, bytes.max(0) as u64))
    }

    fn row_to_checkpoint(row: &Row) -> rusqlite::Result<Checkpoint> {
        let type_str: String = row.get("checkpoint_type")?;
        let context_percent: Option<i64> = row.get("context_percent")?;
        let work_state_str: String = row.get("work_state")?;
        let metadata_str: String = row.get("metadata")?;
        let size_bytes: i64 = row.get("size_bytes")?;
        let created_at_str: String = row.get("created_at")?;

        let mut metadata: CheckpointMetadata =
            serde_json::from_str(&metadata_str).unwrap_or_default();
        metadata.size_bytes = size_bytes.max(0) as u64;

        Ok(Checkpoint {
            checkpoint_id: row.get("checkpoint_id")?,
            instance_id: row.get("instance_id")?,
            checkpoint_type: type_str.parse().unwrap_or(CheckpointType::Manual),
            sequence_num: row.get("sequence_num")?,
            context_percent: context_percent.map(|p| p.clamp(0, 100) as u8),
            work_state: serde_json::from_str::<WorkState>(&work_state_str).unwrap_or_default(),
            metadata,
            created_at: parse_ts(&created_at_str),
        })
    }
}
