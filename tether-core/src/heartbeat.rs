//! Heartbeat reporting
//!
//! Thin wrapper over the registry. [`HeartbeatManager::beat`] is the
//! synchronous path and reports how stale the instance was;
//! [`HeartbeatManager::beat_detached`] is for a session's hot response path
//! and never makes the caller wait or fail.

use crate::config::HeartbeatConfig;
use crate::error::{Error, Result};
use crate::failures::{BackgroundFailure, FailureReporter};
use crate::registry::InstanceRegistry;
use crate::types::{Instance, InstanceStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Outcome of a synchronous heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatReport {
    /// The record after the update
    pub instance: Instance,
    /// Seconds between the previous heartbeat and this one
    pub previous_age_secs: i64,
    /// Whether the instance was stale before this heartbeat
    pub was_stale: bool,
    pub elapsed_ms: u128,
}

/// Validate a raw context percentage.
pub fn validate_context_percent(value: i64) -> Result<u8> {
    if (0..=100).contains(&value) {
        Ok(value as u8)
    } else {
        Err(Error::InvalidInput(format!(
            "context_percent must be an integer between 0 and 100, got {}",
            value
        )))
    }
}

pub struct HeartbeatManager {
    registry: Arc<InstanceRegistry>,
    failures: FailureReporter,
    slow_threshold: Duration,
}

impl HeartbeatManager {
    pub fn new(registry: Arc<InstanceRegistry>, failures: FailureReporter) -> Self {
        Self::with_config(registry, failures, &HeartbeatConfig::default())
    }

    pub fn with_config(
        registry: Arc<InstanceRegistry>,
        failures: FailureReporter,
        config: &HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            failures,
            slow_threshold: Duration::from_millis(config.slow_threshold_ms),
        }
    }

    /// Record a heartbeat and report the instance's previous liveness.
    pub fn beat(
        &self,
        instance_id: &str,
        context_percent: i64,
        current_task: Option<&str>,
    ) -> Result<HeartbeatReport> {
        beat_inner(
            &self.registry,
            self.slow_threshold,
            instance_id,
            context_percent,
            current_task,
        )
    }

    /// Record a heartbeat on the blocking pool and return immediately.
    ///
    /// Failures are logged and sent to the failure channel. The handle may be
    /// dropped; it exists so tests can wait for completion.
    pub fn beat_detached(
        &self,
        instance_id: String,
        context_percent: i64,
        current_task: Option<String>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let failures = self.failures.clone();
        let slow_threshold = self.slow_threshold;

        tokio::task::spawn_blocking(move || {
            if let Err(e) = beat_inner(
                &registry,
                slow_threshold,
                &instance_id,
                context_percent,
                current_task.as_deref(),
            ) {
                failures.report(BackgroundFailure::new("heartbeat", &instance_id, &e));
            }
        })
    }
}

fn beat_inner(
    registry: &InstanceRegistry,
    slow_threshold: Duration,
    instance_id: &str,
    context_percent: i64,
    current_task: Option<&str>,
) -> Result<HeartbeatReport> {
    let started = Instant::now();
    let context_percent = validate_context_percent(context_percent)?;
    let now = Utc::now();

    let previous = registry.require_at(instance_id, now)?;
    let instance = registry.update_heartbeat_at(instance_id, context_percent, current_task, now)?;

    let elapsed = started.elapsed();
    if elapsed > slow_threshold {
        tracing::warn!(
            instance_id,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = slow_threshold.as_millis() as u64,
            "Slow heartbeat"
        );
    }

    Ok(HeartbeatReport {
        previous_age_secs: previous.heartbeat_age_secs(now),
        was_stale: previous.status == InstanceStatus::Stale,
        instance,
        elapsed_ms: elapsed.as_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::failures;
    use crate::types::Role;

    fn setup() -> (HeartbeatManager, Arc<InstanceRegistry>, failures::FailureReceiver) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let registry = Arc::new(InstanceRegistry::new(Arc::new(db)));
        let (reporter, receiver) = failures::channel(8);
        (
            HeartbeatManager::new(Arc::clone(&registry), reporter),
            registry,
            receiver,
        )
    }

    #[test]
    fn test_validate_context_percent() {
        assert_eq!(validate_context_percent(0).unwrap(), 0);
        assert_eq!(validate_context_percent(100).unwrap(), 100);
        assert!(validate_context_percent(101).is_err());
        assert!(validate_context_percent(-1).is_err());
    }

    #[test]
    fn test_beat_updates_record() {
        let (manager, registry, _rx) = setup();
        let instance = registry
            .register("demo", Role::ProjectSupervisor, "local")
            .unwrap();

        let report = manager
            .beat(&instance.instance_id, 42, Some("task-1"))
            .unwrap();
        assert_eq!(report.instance.context_percent, 42);
        assert_eq!(report.instance.current_task.as_deref(), Some("task-1"));
        assert!(!report.was_stale);
    }

    #[test]
    fn test_beat_rejects_out_of_range() {
        let (manager, registry, _rx) = setup();
        let instance = registry
            .register("demo", Role::ProjectSupervisor, "local")
            .unwrap();
        let err = manager.beat(&instance.instance_id, 150, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_detached_failure_goes_to_channel() {
        let (manager, _registry, mut rx) = setup();

        manager
            .beat_detached("ghost-PS-000000".to_string(), 10, None)
            .await
            .unwrap();

        let failures = rx.drain();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "heartbeat");
        assert!(failures[0].message.contains("ghost-PS-000000"));
    }

    #[tokio::test]
    async fn test_detached_success_is_silent() {
        let (manager, registry, mut rx) = setup();
        let instance = registry
            .register("demo", Role::ProjectSupervisor, "local")
            .unwrap();

        manager
            .beat_detached(instance.instance_id.clone(), 64, None)
            .await
            .unwrap();

        assert!(rx.drain().is_empty());
        assert_eq!(
            registry.require(&instance.instance_id).unwrap().context_percent,
            64
        );
    }
}
