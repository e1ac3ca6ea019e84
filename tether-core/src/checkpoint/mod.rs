//! Checkpoints: full, self-contained work-state snapshots
//!
//! A checkpoint is the highest-confidence input to reconstruction. Sequence
//! numbers are a per-instance counter independent of event sequence numbers.
//! Retention cleanup is the only path that ever deletes them.

mod serializer;

pub use serializer::{CaptureRequest, WorkStateSerializer};

use crate::brief;
use crate::db::{Database, NewCheckpointRow};
use crate::error::{Error, Result};
use crate::event_store::{payload, EventPayload, EventStore};
use crate::types::{Checkpoint, CheckpointMetadata, CheckpointSummary, CheckpointType, WorkState};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Default page size for [`CheckpointManager::list`]
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Receipt for a stored checkpoint
#[derive(Debug, Clone, Serialize)]
pub struct CreatedCheckpoint {
    pub checkpoint_id: String,
    pub sequence_num: i64,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// The `checkpoint_created` event, when it could be recorded
    pub event_id: Option<String>,
}

/// A checkpoint together with its rendered recovery brief
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointWithBrief {
    pub checkpoint: Checkpoint,
    pub brief: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointPage {
    pub checkpoints: Vec<CheckpointSummary>,
    /// Counted separately, never derived from the page
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    /// Sum of recorded sizes, not a storage scan
    pub bytes_freed: u64,
    pub cutoff: DateTime<Utc>,
}

pub struct CheckpointManager {
    db: Arc<Database>,
    events: EventStore,
}

impl CheckpointManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            events: EventStore::new(Arc::clone(&db)),
            db,
        }
    }

    /// Store a snapshot of `work_state`.
    pub fn create(
        &self,
        instance_id: &str,
        checkpoint_type: CheckpointType,
        context_percent: Option<u8>,
        work_state: &WorkState,
        metadata: Option<CheckpointMetadata>,
    ) -> Result<CreatedCheckpoint> {
        self.create_at(
            instance_id,
            checkpoint_type,
            context_percent,
            work_state,
            metadata,
            Utc::now(),
        )
    }

    pub fn create_at(
        &self,
        instance_id: &str,
        checkpoint_type: CheckpointType,
        context_percent: Option<u8>,
        work_state: &WorkState,
        metadata: Option<CheckpointMetadata>,
        now: DateTime<Utc>,
    ) -> Result<CreatedCheckpoint> {
        if let Some(pct) = context_percent.filter(|p| *p > 100) {
            return Err(Error::InvalidInput(format!(
                "context_percent must be between 0 and 100, got {}",
                pct
            )));
        }
        if !self.db.instance_exists(instance_id)? {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }

        let work_state_json = serde_json::to_string(work_state)?;
        let size_bytes = work_state_json.len() as u64;

        let mut metadata = metadata.unwrap_or_default();
        metadata.size_bytes = size_bytes;
        let metadata_json = serde_json::to_string(&metadata)?;

        let checkpoint_id = uuid::Uuid::new_v4().to_string();
        let sequence_num = self.db.insert_checkpoint_next_seq(&NewCheckpointRow {
            checkpoint_id: &checkpoint_id,
            instance_id,
            checkpoint_type,
            context_percent,
            work_state: &work_state_json,
            metadata: &metadata_json,
            size_bytes,
            created_at: now,
        })?;

        tracing::info!(
            instance_id,
            checkpoint_id = %checkpoint_id,
            checkpoint_type = %checkpoint_type,
            sequence_num,
            size_bytes,
            "Created checkpoint"
        );

        let marker = EventPayload::CheckpointCreated(payload::CheckpointCreated {
            checkpoint_id: checkpoint_id.clone(),
            checkpoint_type: checkpoint_type.as_str().to_string(),
            sequence_num,
        });
        let event_id = match self.events.emit_at(instance_id, &marker, None, now) {
            Ok(emitted) => Some(emitted.event_id),
            Err(e) => {
                tracing::warn!(
                    instance_id,
                    error = %e,
                    "Failed to record checkpoint_created event"
                );
                None
            }
        };

        Ok(CreatedCheckpoint {
            checkpoint_id,
            sequence_num,
            size_bytes,
            created_at: now,
            event_id,
        })
    }

    /// Fetch a checkpoint and render its recovery brief.
    pub fn get(&self, checkpoint_id: &str) -> Result<CheckpointWithBrief> {
        let checkpoint = self
            .db
            .get_checkpoint(checkpoint_id)?
            .ok_or_else(|| Error::CheckpointNotFound(checkpoint_id.to_string()))?;
        let brief = brief::generate(&checkpoint.work_state, Some(checkpoint.checkpoint_type));
        Ok(CheckpointWithBrief { checkpoint, brief })
    }

    pub fn latest(&self, instance_id: &str) -> Result<Option<Checkpoint>> {
        self.db.latest_checkpoint(instance_id)
    }

    /// Page of summaries, newest first, with a separate total count.
    pub fn list(
        &self,
        instance_id: &str,
        checkpoint_type: Option<CheckpointType>,
        limit: usize,
        offset: usize,
    ) -> Result<CheckpointPage> {
        if !self.db.instance_exists(instance_id)? {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };

        let checkpoints = self
            .db
            .list_checkpoints(instance_id, checkpoint_type, limit, offset)?;
        let total = self.db.count_checkpoints(instance_id, checkpoint_type)?;
        let has_more = (offset + checkpoints.len()) < total as usize;

        Ok(CheckpointPage {
            checkpoints,
            total,
            has_more,
        })
    }

    /// Delete checkpoints older than `retention_days`.
    pub fn cleanup(&self, retention_days: u32) -> Result<CleanupReport> {
        self.cleanup_at(retention_days, Utc::now())
    }

    pub fn cleanup_at(&self, retention_days: u32, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let (deleted, bytes_freed) = self.db.delete_checkpoints_before(cutoff)?;

        tracing::info!(retention_days, deleted, bytes_freed, "Checkpoint cleanup finished");

        Ok(CleanupReport {
            deleted,
            bytes_freed,
            cutoff,
        })
    }
}
