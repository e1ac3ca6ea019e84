//! Recovery brief rendering
//!
//! Turns a [`WorkState`] into the text a resuming session reads first.
//! Rendering never fails: any formatting error degrades to a short generic
//! brief.

use crate::format::{format_elapsed_minutes, truncate_chars};
use crate::types::{ChangeKind, CheckpointType, WorkState};
use std::fmt::{self, Write};

/// Modified files listed before summarizing the rest
pub const MAX_LISTED_FILES: usize = 10;
const MAX_LISTED_COMMANDS: usize = 5;

/// Render a recovery brief. `trigger` is `None` for reconstructed state.
pub fn generate(work_state: &WorkState, trigger: Option<CheckpointType>) -> String {
    let mut out = String::new();
    match render(&mut out, work_state, trigger) {
        Ok(()) => out,
        Err(e) => {
            tracing::warn!(error = %e, "Recovery brief rendering failed, using generic brief");
            generic(work_state)
        }
    }
}

/// Minimal brief used when full rendering fails.
pub fn generic(work_state: &WorkState) -> String {
    let task = work_state
        .current_task
        .as_ref()
        .map(|t| t.name.as_str())
        .unwrap_or("unknown");
    format!(
        concat!(
            "RECOVERY BRIEF\nProject: {}\nLast known task: {}\n\nNext steps\n",
            "  1. Inspect the working tree and recent history before continuing.\n"
        ),
        work_state.environment.project, task
    )
}

fn trigger_label(trigger: Option<CheckpointType>) -> &'static str {
    match trigger {
        Some(CheckpointType::ContextPressure) => "context pressure",
        Some(CheckpointType::TaskCompletion) => "task completion",
        Some(CheckpointType::Manual) => "manual checkpoint",
        None => "reconstructed",
    }
}

fn change_marker(change: ChangeKind) -> char {
    match change {
        ChangeKind::Added => 'A',
        ChangeKind::Modified => 'M',
        ChangeKind::Deleted => 'D',
        ChangeKind::Renamed => 'R',
        ChangeKind::Untracked => '?',
    }
}

fn render(out: &mut String, ws: &WorkState, trigger: Option<CheckpointType>) -> fmt::Result {
    writeln!(out, "RECOVERY BRIEF")?;
    writeln!(out, "Trigger: {}", trigger_label(trigger))?;
    if !ws.environment.project.is_empty() {
        writeln!(out, "Project: {}", ws.environment.project)?;
    }
    if let Some(dir) = &ws.environment.working_directory {
        writeln!(out, "Working directory: {}", dir)?;
    }
    writeln!(out, "Snapshot: {}", ws.snapshot_at.format("%Y-%m-%d %H:%M UTC"))?;

    writeln!(out)?;
    writeln!(out, "Current task")?;
    match &ws.current_task {
        Some(task) => {
            match &task.id {
                Some(id) => writeln!(out, "  Name: {} ({})", task.name, id)?,
                None => writeln!(out, "  Name: {}", task.name)?,
            }
            if let Some(epic) = &task.epic_id {
                writeln!(out, "  Epic: {}", epic)?;
            }
            if !task.status.is_empty() {
                writeln!(out, "  Status: {}", task.status)?;
            }
            if let Some(minutes) = task.elapsed_minutes {
                writeln!(out, "  Elapsed: {}", format_elapsed_minutes(minutes))?;
            }
            if task.tests_passed > 0 || task.tests_failed > 0 {
                writeln!(
                    out,
                    "  Tests: {} passed, {} failed",
                    task.tests_passed, task.tests_failed
                )?;
            }
        }
        None => writeln!(out, "  (no task recorded)")?,
    }

    if !ws.files_modified.is_empty() {
        writeln!(out)?;
        writeln!(out, "Modified files ({})", ws.files_modified.len())?;
        for file in ws.files_modified.iter().take(MAX_LISTED_FILES) {
            write!(out, "  {} {}", change_marker(file.change), file.path)?;
            if file.lines_added > 0 || file.lines_removed > 0 {
                write!(out, " (+{} -{})", file.lines_added, file.lines_removed)?;
            }
            writeln!(out)?;
        }
        if ws.files_modified.len() > MAX_LISTED_FILES {
            writeln!(
                out,
                "  ... and {} more",
                ws.files_modified.len() - MAX_LISTED_FILES
            )?;
        }
    }

    let vcs = &ws.vcs_status;
    if vcs.branch.is_some() || !vcs.is_clean() || vcs.commit_count > 0 {
        writeln!(out)?;
        writeln!(out, "Version control")?;
        writeln!(
            out,
            "  Branch: {}",
            vcs.branch.as_deref().unwrap_or("(detached)")
        )?;
        writeln!(
            out,
            "  Staged {}, unstaged {}, untracked {}, commits {}",
            vcs.staged, vcs.unstaged, vcs.untracked, vcs.commit_count
        )?;
    }

    if !ws.last_commands.is_empty() {
        writeln!(out)?;
        writeln!(out, "Recent commands")?;
        for cmd in ws.last_commands.iter().take(MAX_LISTED_COMMANDS) {
            let mark = if cmd.success { "ok" } else { "FAILED" };
            writeln!(out, "  - [{}] {}", mark, truncate_chars(&cmd.action, 80))?;
        }
    }

    if let Some(status) = &ws.external_document_status {
        writeln!(out)?;
        writeln!(out, "Documents: {}", status)?;
    }

    if !ws.pending_tasks.is_empty() {
        writeln!(out)?;
        writeln!(out, "Pending tasks")?;
        for task in &ws.pending_tasks {
            writeln!(out, "  - {}", task)?;
        }
    }

    if !ws.important_context.is_empty() {
        writeln!(out)?;
        writeln!(out, "Important context")?;
        for note in &ws.important_context {
            writeln!(out, "  - {}", note)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "Next steps")?;
    for (i, step) in next_steps(ws, trigger).iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, step)?;
    }

    Ok(())
}

/// Suggestions depend on what caused the snapshot.
fn next_steps(ws: &WorkState, trigger: Option<CheckpointType>) -> Vec<String> {
    let task_name = ws.current_task.as_ref().map(|t| t.name.as_str());
    let mut steps = Vec::new();

    match trigger {
        Some(CheckpointType::ContextPressure) => {
            steps.push(
                "Context ran low in the previous session; keep this brief as the source of truth."
                    .to_string(),
            );
            if !ws.files_modified.is_empty() {
                steps.push("Re-read the modified files before editing them further.".to_string());
            }
            if let Some(name) = task_name {
                steps.push(format!("Continue '{}' from its last recorded status.", name));
            }
        }
        Some(CheckpointType::TaskCompletion) => {
            if let Some(name) = task_name {
                steps.push(format!("Confirm '{}' is done by running the test suite.", name));
            }
            if !ws.vcs_status.is_clean() {
                steps.push("Commit and push the outstanding changes.".to_string());
            }
            match ws.pending_tasks.first() {
                Some(next) => steps.push(format!("Start the next pending task: {}.", next)),
                None => steps.push("Pick up the next task from the backlog.".to_string()),
            }
        }
        Some(CheckpointType::Manual) => {
            steps.push("Check that the state above matches the working tree.".to_string());
            if let Some(name) = task_name {
                steps.push(format!("Resume '{}'.", name));
            }
        }
        None => {
            steps.push("This state was reconstructed; verify it before relying on it.".to_string());
            if let Some(name) = task_name {
                steps.push(format!("Resume '{}' once verified.", name));
            }
        }
    }

    if let Some(task) = &ws.current_task {
        if task.tests_failed > 0 {
            steps.push(format!("Fix the {} failing test(s).", task.tests_failed));
        }
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileChange, TaskDescriptor, VcsStatus};

    fn work_state() -> WorkState {
        WorkState {
            current_task: Some(TaskDescriptor {
                id: Some("T-7".into()),
                name: "wire auth".into(),
                status: "implementation".into(),
                epic_id: Some("epic-003".into()),
                elapsed_minutes: Some(72),
                tests_passed: 8,
                tests_failed: 2,
            }),
            vcs_status: VcsStatus {
                branch: Some("feat/auth".into()),
                unstaged: 1,
                ..Default::default()
            },
            pending_tasks: vec!["add refresh tokens".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_brief_contains_task_details() {
        let brief = generate(&work_state(), Some(CheckpointType::Manual));
        assert!(brief.contains("epic-003"));
        assert!(brief.contains("wire auth (T-7)"));
        assert!(brief.contains("1h12m"));
        assert!(brief.contains("feat/auth"));
        assert!(brief.contains("Fix the 2 failing test(s)."));
    }

    #[test]
    fn test_next_steps_vary_by_trigger() {
        let ws = work_state();
        let pressure = generate(&ws, Some(CheckpointType::ContextPressure));
        let done = generate(&ws, Some(CheckpointType::TaskCompletion));
        let rebuilt = generate(&ws, None);

        assert!(pressure.contains("Context ran low"));
        assert!(done.contains("Start the next pending task: add refresh tokens."));
        assert!(done.contains("Commit and push"));
        assert!(rebuilt.contains("reconstructed"));
        assert_ne!(pressure, done);
    }

    #[test]
    fn test_file_list_is_capped() {
        let mut ws = work_state();
        ws.files_modified = (0..15)
            .map(|i| FileChange {
                path: format!("src/file{}.rs", i),
                change: ChangeKind::Modified,
                lines_added: 1,
                lines_removed: 0,
            })
            .collect();

        let brief = generate(&ws, Some(CheckpointType::Manual));
        assert!(brief.contains("Modified files (15)"));
        assert!(brief.contains("src/file9.rs"));
        assert!(!brief.contains("src/file10.rs"));
        assert!(brief.contains("... and 5 more"));
    }

    #[test]
    fn test_empty_state_still_renders() {
        let brief = generate(&WorkState::default(), None);
        assert!(brief.contains("(no task recorded)"));
        assert!(brief.contains("Next steps"));
    }

    #[test]
    fn test_generic_brief() {
        let brief = generic(&work_state());
        assert!(brief.contains("wire auth"));
    }
}
