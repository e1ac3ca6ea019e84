//! Event replay
//!
//! A left fold over events in sequence order into a small aggregate. Pure:
//! the same events always produce the same state.

use super::payload::EventPayload;
use super::Event;
use crate::types::{Environment, TaskDescriptor, VcsStatus, WorkState};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Notes kept from `note_added` / `task_blocked` events
const MAX_NOTES: usize = 10;

/// Outcome of the most recent test run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestMarker {
    pub suite: Option<String>,
    pub passed: u32,
    pub failed: u32,
    /// "running", "passed" or "failed"
    pub outcome: String,
}

/// Aggregate produced by replaying an instance's events
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayState {
    pub events_applied: usize,
    pub last_sequence_num: Option<i64>,
    pub last_event_type: Option<String>,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub last_task: Option<TaskDescriptor>,
    pub last_tests: Option<TestMarker>,
    pub last_error: Option<String>,
    pub branch: Option<String>,
    pub commits: u32,
    pub context_percent: Option<u8>,
    pub checkpoints_seen: u32,
    pub last_checkpoint_id: Option<String>,
    pub notes: Vec<String>,
}

impl ReplayState {
    /// Fold a sequence of events, oldest first.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        events.into_iter().fold(Self::default(), Self::apply)
    }

    /// Merge one event into the aggregate.
    pub fn apply(mut self, event: &Event) -> Self {
        self.events_applied += 1;
        self.last_sequence_num = Some(event.sequence_num);
        self.last_event_type = Some(event.event_type.clone());
        self.latest_timestamp = Some(match self.latest_timestamp {
            Some(ts) if ts > event.timestamp => ts,
            _ => event.timestamp,
        });

        match &event.payload {
            EventPayload::TaskStarted(p) => {
                self.last_task = Some(TaskDescriptor {
                    id: p.task_id.clone(),
                    name: p.name.clone(),
                    status: "started".to_string(),
                    epic_id: p.epic_id.clone(),
                    ..Default::default()
                });
            }
            EventPayload::TaskProgress(p) => {
                let task = self.task_mut(p.task_id.as_deref(), p.name.as_deref());
                task.status = p.status.clone();
            }
            EventPayload::TaskCompleted(p) => {
                let task = self.task_mut(p.task_id.as_deref(), p.name.as_deref());
                task.status = "completed".to_string();
            }
            EventPayload::TaskFailed(p) => {
                let task = self.task_mut(p.task_id.as_deref(), p.name.as_deref());
                task.status = "failed".to_string();
                self.last_error = Some(p.error.clone());
            }
            EventPayload::TaskBlocked(p) => {
                let task = self.task_mut(p.task_id.as_deref(), p.name.as_deref());
                task.status = "blocked".to_string();
                self.push_note(format!("blocked: {}", p.reason));
            }
            EventPayload::TestsStarted(p) => {
                self.last_tests = Some(TestMarker {
                    suite: p.suite.clone(),
                    outcome: "running".to_string(),
                    ..Default::default()
                });
            }
            EventPayload::TestsPassed(p) => {
                self.record_tests(p.suite.clone(), p.passed, 0, "passed");
            }
            EventPayload::TestsFailed(p) => {
                self.record_tests(p.suite.clone(), p.passed, p.failed, "failed");
            }
            EventPayload::BranchCreated(p) => self.branch = Some(p.branch.clone()),
            EventPayload::BranchPushed(p) => self.branch = Some(p.branch.clone()),
            EventPayload::CommitCreated(p) => {
                self.commits += 1;
                if let Some(branch) = &p.branch {
                    self.branch = Some(branch.clone());
                }
            }
            EventPayload::PullRequestOpened(p) => {
                if let Some(branch) = &p.branch {
                    self.branch = Some(branch.clone());
                }
            }
            EventPayload::CheckpointCreated(p) => {
                self.checkpoints_seen += 1;
                self.last_checkpoint_id = Some(p.checkpoint_id.clone());
            }
            EventPayload::ErrorRaised(p) => self.last_error = Some(p.message.clone()),
            EventPayload::ContextThreshold(p) => self.context_percent = Some(p.context_percent),
            EventPayload::NoteAdded(p) => self.push_note(p.text.clone()),
            EventPayload::InstanceStarted(_)
            | EventPayload::InstanceResumed(_)
            | EventPayload::InstancePaused(_)
            | EventPayload::InstanceClosed(_)
            | EventPayload::Unrecognized { .. } => {}
        }

        self
    }

    /// Whether anything beyond lifecycle or checkpoint markers was seen
    pub fn has_work_signal(&self) -> bool {
        self.last_task.is_some()
            || self.last_tests.is_some()
            || self.last_error.is_some()
            || self.branch.is_some()
            || self.commits > 0
            || !self.notes.is_empty()
    }

    /// Current task, creating a placeholder when progress arrives without a start.
    fn task_mut(&mut self, task_id: Option<&str>, name: Option<&str>) -> &mut TaskDescriptor {
        let same_task = match (&self.last_task, task_id) {
            (Some(task), Some(id)) => task.id.as_deref() == Some(id),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !same_task {
            self.last_task = Some(TaskDescriptor {
                id: task_id.map(str::to_string),
                ..Default::default()
            });
        }

        let task = self.last_task.get_or_insert_with(TaskDescriptor::default);
        if let Some(name) = name {
            task.name = name.to_string();
        }
        task
    }

    fn record_tests(&mut self, suite: Option<String>, passed: u32, failed: u32, outcome: &str) {
        self.last_tests = Some(TestMarker {
            suite,
            passed,
            failed,
            outcome: outcome.to_string(),
        });
        if let Some(task) = self.last_task.as_mut() {
            task.tests_passed = passed;
            task.tests_failed = failed;
        }
    }

    fn push_note(&mut self, note: String) {
        self.notes.push(note);
        if self.notes.len() > MAX_NOTES {
            self.notes.remove(0);
        }
    }

    /// Project the aggregate onto a work state.
    pub fn to_work_state(&self, project: &str, snapshot_at: DateTime<Utc>) -> WorkState {
        let mut important_context = self.notes.clone();
        if let Some(error) = &self.last_error {
            important_context.push(format!("last error: {}", error));
        }
        if let Some(tests) = &self.last_tests {
            important_context.push(format!(
                "last test run {} ({} passed, {} failed)",
                tests.outcome, tests.passed, tests.failed
            ));
        }

        WorkState {
            current_task: self.last_task.clone(),
            vcs_status: VcsStatus {
                branch: self.branch.clone(),
                commit_count: self.commits,
                ..Default::default()
            },
            environment: Environment {
                project: project.to_string(),
                ..Default::default()
            },
            important_context,
            snapshot_at,
            ..Default::default()
        }
    }
}
