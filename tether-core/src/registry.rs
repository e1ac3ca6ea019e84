//! Instance registry
//!
//! Source of truth for which sessions exist and whether they are alive.
//! Status is never stored: every read derives it from `last_heartbeat` and
//! `closed_at` against the caller's `now`, so there is no background sweep.

use crate::config::RegistryConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::id;
use crate::types::{Instance, InstanceStatus, Role};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Seconds without a heartbeat before an open instance counts as stale
pub const STALE_THRESHOLD_SECS: i64 = 120;

/// Filters for [`InstanceRegistry::list`]
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub project: Option<String>,
    /// Keep only instances whose derived status is active
    pub active_only: bool,
}

impl ListFilter {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            active_only: false,
        }
    }
}

/// Registry of sessions over the shared database.
pub struct InstanceRegistry {
    db: Arc<Database>,
    stale_after_secs: i64,
}

impl InstanceRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_threshold(db, STALE_THRESHOLD_SECS)
    }

    pub fn with_threshold(db: Arc<Database>, stale_after_secs: i64) -> Self {
        Self {
            db,
            stale_after_secs,
        }
    }

    pub fn from_config(db: Arc<Database>, config: &RegistryConfig) -> Self {
        Self::with_threshold(db, config.stale_after_secs)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn stale_after_secs(&self) -> i64 {
        self.stale_after_secs
    }

    /// Register a new session. Must be the session's first action.
    pub fn register(&self, project: &str, role: Role, host: &str) -> Result<Instance> {
        self.register_at(project, role, host, Utc::now())
    }

    pub fn register_at(
        &self,
        project: &str,
        role: Role,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        let project = id::normalize_project(project)?;
        let instance_id = id::generate(&project, role)?;

        let instance = Instance {
            instance_id,
            project,
            role,
            status: InstanceStatus::Active,
            context_percent: 0,
            current_task: None,
            host_location: host.to_string(),
            last_heartbeat: now,
            created_at: now,
            closed_at: None,
        };

        self.db.insert_instance(&instance)?;

        tracing::info!(
            instance_id = %instance.instance_id,
            project = %instance.project,
            role = %instance.role,
            "Registered instance"
        );

        Ok(instance)
    }

    /// Record liveness and return the fresh record.
    pub fn update_heartbeat(
        &self,
        instance_id: &str,
        context_percent: u8,
        current_task: Option<&str>,
    ) -> Result<Instance> {
        self.update_heartbeat_at(instance_id, context_percent, current_task, Utc::now())
    }

    pub fn update_heartbeat_at(
        &self,
        instance_id: &str,
        context_percent: u8,
        current_task: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        if context_percent > 100 {
            return Err(Error::InvalidInput(format!(
                "context_percent must be between 0 and 100, got {}",
                context_percent
            )));
        }

        let touched = self
            .db
            .update_heartbeat(instance_id, context_percent, current_task, now)?;

        if touched == 0 {
            return Err(if self.db.instance_exists(instance_id)? {
                Error::InvalidInput(format!("instance {} is closed", instance_id))
            } else {
                Error::InstanceNotFound(instance_id.to_string())
            });
        }

        self.require_at(instance_id, now)
    }

    /// List instances ordered by project, then most recent heartbeat.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>> {
        self.list_at(filter, Utc::now())
    }

    pub fn list_at(&self, filter: &ListFilter, now: DateTime<Utc>) -> Result<Vec<Instance>> {
        let mut instances =
            self.db
                .list_instances(filter.project.as_deref(), now, self.stale_after_secs)?;
        if filter.active_only {
            instances.retain(|i| i.status == InstanceStatus::Active);
        }
        Ok(instances)
    }

    pub fn get(&self, instance_id: &str) -> Result<Option<Instance>> {
        self.get_at(instance_id, Utc::now())
    }

    pub fn get_at(&self, instance_id: &str, now: DateTime<Utc>) -> Result<Option<Instance>> {
        self.db
            .get_instance(instance_id, now, self.stale_after_secs)
    }

    /// Like [`get`](Self::get) but a missing instance is an error.
    pub fn require(&self, instance_id: &str) -> Result<Instance> {
        self.require_at(instance_id, Utc::now())
    }

    pub fn require_at(&self, instance_id: &str, now: DateTime<Utc>) -> Result<Instance> {
        self.get_at(instance_id, now)?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))
    }

    /// Exact id first, then a unique prefix. An ambiguous prefix yields `None`.
    pub fn get_details(&self, hint: &str) -> Result<Option<Instance>> {
        self.get_details_at(hint, Utc::now())
    }

    pub fn get_details_at(&self, hint: &str, now: DateTime<Utc>) -> Result<Option<Instance>> {
        if let Some(instance) = self.get_at(hint, now)? {
            return Ok(Some(instance));
        }

        let mut matches = self.find_by_prefix_at(hint, now)?;
        if matches.len() == 1 {
            Ok(matches.pop())
        } else {
            if matches.len() > 1 {
                tracing::debug!(hint, matches = matches.len(), "Ambiguous instance prefix");
            }
            Ok(None)
        }
    }

    /// All instances whose id starts with `prefix`, most recent heartbeat first
    pub fn find_by_prefix_at(&self, prefix: &str, now: DateTime<Utc>) -> Result<Vec<Instance>> {
        if prefix.is_empty() {
            return Ok(vec![]);
        }
        self.db
            .find_instances_by_prefix(prefix, now, self.stale_after_secs)
    }

    /// Close an instance. One-way; closing twice is an error.
    pub fn mark_closed(&self, instance_id: &str) -> Result<Instance> {
        self.mark_closed_at(instance_id, Utc::now())
    }

    pub fn mark_closed_at(&self, instance_id: &str, now: DateTime<Utc>) -> Result<Instance> {
        let touched = self.db.close_instance(instance_id, now)?;
        if touched == 0 {
            return Err(if self.db.instance_exists(instance_id)? {
                Error::InvalidInput(format!("instance {} is already closed", instance_id))
            } else {
                Error::InstanceNotFound(instance_id.to_string())
            });
        }

        tracing::info!(instance_id, "Closed instance");
        self.require_at(instance_id, now)
    }

    /// Derived status of one instance at `now`
    pub fn status_at(&self, instance_id: &str, now: DateTime<Utc>) -> Result<InstanceStatus> {
        Ok(self.require_at(instance_id, now)?.status)
    }
}
