//! Work-state capture
//!
//! Gathers version-control status, recent commands and environment facts
//! concurrently. Each probe handles its own failure and falls back to an
//! empty default, so a capture always returns a (possibly partial) snapshot.

use crate::config::CheckpointConfig;
use crate::db::Database;
use crate::git::GitRunner;
use crate::types::{
    CommandSummary, Environment, FileChange, TaskDescriptor, VcsStatus, WorkState,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

/// What the caller knows that probes cannot discover
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    pub instance_id: String,
    pub project: String,
    /// Repository root to probe; no VCS probe runs without one
    pub working_directory: Option<PathBuf>,
    pub current_task: Option<TaskDescriptor>,
    pub external_document_status: Option<String>,
    pub pending_tasks: Vec<String>,
    pub important_context: Vec<String>,
}

pub struct WorkStateSerializer {
    db: Arc<Database>,
    max_modified_files: usize,
    recent_commands: usize,
}

impl WorkStateSerializer {
    pub fn new(db: Arc<Database>, config: &CheckpointConfig) -> Self {
        Self {
            db,
            max_modified_files: config.max_modified_files,
            recent_commands: config.recent_commands,
        }
    }

    /// Capture a best-effort snapshot. Never fails.
    pub async fn capture(&self, request: &CaptureRequest) -> WorkState {
        let (vcs, commands, environment) = tokio::join!(
            self.probe_vcs(request),
            self.probe_commands(&request.instance_id),
            probe_environment(request),
        );
        let (vcs_status, files_modified) = vcs;

        WorkState {
            current_task: request.current_task.clone(),
            files_modified,
            vcs_status,
            last_commands: commands,
            external_document_status: request.external_document_status.clone(),
            environment,
            pending_tasks: request.pending_tasks.clone(),
            important_context: request.important_context.clone(),
            snapshot_at: Utc::now(),
        }
    }

    async fn probe_vcs(&self, request: &CaptureRequest) -> (VcsStatus, Vec<FileChange>) {
        let Some(dir) = request.working_directory.as_ref() else {
            return Default::default();
        };
        let git = GitRunner::new(dir);

        let (status, numstat, commits) =
            tokio::join!(git.status(), git.numstat(), git.commit_count());

        let (mut vcs, mut files) = match status {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "VCS status probe failed");
                return Default::default();
            }
        };

        match numstat {
            Ok(stats) => {
                for file in &mut files {
                    if let Some((added, removed)) = stats.get(&file.path) {
                        file.lines_added = *added;
                        file.lines_removed = *removed;
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "Diff numstat probe failed"),
        }

        match commits {
            Ok(count) => vcs.commit_count = count,
            Err(e) => tracing::debug!(error = %e, "Commit count probe failed"),
        }

        if files.len() > self.max_modified_files {
            tracing::debug!(
                total = files.len(),
                kept = self.max_modified_files,
                "Capping modified-files ledger"
            );
            files.truncate(self.max_modified_files);
        }

        (vcs, files)
    }

    async fn probe_commands(&self, instance_id: &str) -> Vec<CommandSummary> {
        let db = Arc::clone(&self.db);
        let instance_id = instance_id.to_string();
        let limit = self.recent_commands;

        let result =
            tokio::task::spawn_blocking(move || db.recent_commands(&instance_id, limit)).await;

        match result {
            Ok(Ok(entries)) => entries.iter().map(CommandSummary::from).collect(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Command history probe failed");
                vec![]
            }
            Err(e) => {
                tracing::warn!(error = %e, "Command history probe panicked");
                vec![]
            }
        }
    }
}

async fn probe_environment(request: &CaptureRequest) -> Environment {
    let working_directory = match &request.working_directory {
        Some(dir) => match tokio::fs::canonicalize(dir).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                tracing::debug!(
                    dir = %dir.display(),
                    error = %e,
                    "Working directory not resolvable"
                );
                Some(dir.display().to_string())
            }
        },
        None => None,
    };

    Environment {
        project: request.project.clone(),
        working_directory,
        host: hostname(),
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
}
