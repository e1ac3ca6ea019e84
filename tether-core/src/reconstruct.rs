//! Context reconstruction
//!
//! Answers "what was this session doing?" through a strict cascade:
//!
//! 1. the newest checkpoint, if it is under an hour old
//! 2. replay of the latest event's parent chain (flat scan of the last 50
//!    events if the chain is broken), when it holds more than markers
//! 3. inference from the last 20 command-log entries
//! 4. the bare registry row
//!
//! The first tier that applies wins. A missing instance is the only error;
//! every other tier failure is logged, noted as a warning, and falls through.

use crate::confidence::{self, ValidityChecks};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::event_store::{Event, EventKind, EventStore, ReplayState};
use crate::git;
use crate::registry::InstanceRegistry;
use crate::types::{
    ChangeKind, CheckpointType, CommandLogEntry, CommandSummary, Environment, FileChange,
    Instance, ReconstructedContext, ReconstructionSource, TaskDescriptor, VcsStatus, WorkState,
};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// Checkpoints at least this old are skipped
pub const CHECKPOINT_MAX_AGE_MINUTES: i64 = 60;
/// Events read by the flat-scan fallback
pub const FLAT_SCAN_EVENTS: usize = 50;
/// Longest parent chain followed
pub const CHAIN_WALK_LIMIT: usize = 200;
/// Command-log entries used for inference
pub const INFERENCE_COMMANDS: usize = 20;
/// Modified files checked for existence
pub const SAMPLED_FILES: usize = 5;

const MAX_INFERRED_FILES: usize = 50;
const MAX_EMBEDDED_COMMANDS: usize = 10;

static BRANCH_SWITCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bgit\s+(?:checkout|switch)(?:\s+-[bcB])?\s+([A-Za-z0-9._/-]+)")
        .expect("static regex")
});

static TEST_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\b(cargo (?:test|nextest)|npm (?:run )?test|pnpm test|yarn test",
        r"|pytest|go test|make test)\b"
    ))
    .expect("static regex")
});

/// Existence checks against the machine the session ran on.
pub trait Workspace: Send + Sync {
    fn directory_exists(&self, dir: &str) -> bool;

    /// `None` when it cannot be determined (no git, not a repository)
    fn branch_exists(&self, dir: &str, branch: &str) -> Option<bool>;

    fn file_exists(&self, dir: &str, path: &str) -> bool;
}

/// Local filesystem plus `git rev-parse`
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWorkspace;

impl Workspace for FsWorkspace {
    fn directory_exists(&self, dir: &str) -> bool {
        Path::new(dir).is_dir()
    }

    fn branch_exists(&self, dir: &str, branch: &str) -> Option<bool> {
        git::local_branch_exists(Path::new(dir), branch)
    }

    fn file_exists(&self, dir: &str, path: &str) -> bool {
        Path::new(dir).join(path).exists()
    }
}

pub struct Reconstructor {
    registry: Arc<InstanceRegistry>,
    events: EventStore,
    workspace: Arc<dyn Workspace>,
}

/// Output of one tier before scoring
struct TierResult {
    source: ReconstructionSource,
    work_state: WorkState,
    age_minutes: i64,
    checks: ValidityChecks,
    checkpoint_type: Option<CheckpointType>,
}

impl Reconstructor {
    pub fn new(registry: Arc<InstanceRegistry>, workspace: Arc<dyn Workspace>) -> Self {
        Self {
            events: EventStore::new(Arc::clone(registry.database())),
            registry,
            workspace,
        }
    }

    fn db(&self) -> &Database {
        self.registry.database()
    }

    pub fn reconstruct(&self, instance_id: &str) -> Result<ReconstructedContext> {
        self.reconstruct_at(instance_id, Utc::now())
    }

    pub fn reconstruct_at(
        &self,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconstructedContext> {
        let instance = self
            .registry
            .get_at(instance_id, now)?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        let mut warnings = Vec::new();

        let tier = self
            .from_checkpoint(&instance, now, &mut warnings)
            .or_else(|| self.from_events(&instance, now, &mut warnings))
            .or_else(|| self.from_commands(&instance, now, &mut warnings))
            .unwrap_or_else(|| from_registry(&instance, now));

        let scored = confidence::score(tier.source, tier.age_minutes, &tier.checks);
        warnings.extend(scored.warnings);

        tracing::info!(
            instance_id,
            source = %tier.source,
            confidence = scored.score,
            age_minutes = tier.age_minutes,
            "Reconstructed context"
        );

        Ok(ReconstructedContext {
            instance_id: instance.instance_id.clone(),
            source: tier.source,
            confidence_score: scored.score,
            confidence_reason: scored.reason,
            warnings,
            summary: summarize(tier.source, &tier.work_state),
            work_state: tier.work_state,
            age_minutes: tier.age_minutes,
            checkpoint_type: tier.checkpoint_type,
        })
    }

    fn from_checkpoint(
        &self,
        instance: &Instance,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Option<TierResult> {
        let checkpoint = match self.db().latest_checkpoint(&instance.instance_id) {
            Ok(Some(cp)) => cp,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    instance_id = %instance.instance_id,
                    error = %e,
                    "Checkpoint tier failed"
                );
                warnings.push(format!("checkpoint lookup failed: {}", e));
                return None;
            }
        };

        let age = now.signed_duration_since(checkpoint.created_at);
        if age >= Duration::minutes(CHECKPOINT_MAX_AGE_MINUTES) {
            warnings.push(format!(
                "newest checkpoint is {}m old; not used",
                age.num_minutes()
            ));
            return None;
        }

        Some(TierResult {
            source: ReconstructionSource::Checkpoint,
            checks: self.validity(&checkpoint.work_state),
            age_minutes: age.num_minutes().max(0),
            checkpoint_type: Some(checkpoint.checkpoint_type),
            work_state: checkpoint.work_state,
        })
    }

    fn from_events(
        &self,
        instance: &Instance,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Option<TierResult> {
        let id = instance.instance_id.as_str();

        let latest = match self.events.latest(id, 1) {
            Ok(mut events) => events.pop()?,
            Err(e) => {
                tracing::warn!(instance_id = id, error = %e, "Event tier failed");
                warnings.push(format!("event lookup failed: {}", e));
                return None;
            }
        };

        let mut checks = ValidityChecks::default();
        let events: Vec<Event> = match self.events.ancestry(&latest.event_id, CHAIN_WALK_LIMIT) {
            Ok(chain) => chain,
            Err(e) => {
                tracing::warn!(
                    instance_id = id,
                    error = %e,
                    "Event chain walk failed, using flat scan"
                );
                warnings.push(format!("event chain walk failed ({}); used flat scan", e));
                checks.replay_degraded = true;
                match self.events.latest(id, FLAT_SCAN_EVENTS) {
                    Ok(events) => events,
                    Err(e) => {
                        warnings.push(format!("flat event scan failed: {}", e));
                        return None;
                    }
                }
            }
        };
        if events.is_empty() {
            return None;
        }

        let mut state = ReplayState::replay(&events);
        if state.last_task.is_none() {
            // Long sessions can push the task start out of the walked chain.
            if let Some(started) = self.task_start_before(id, &events) {
                state = ReplayState::replay(std::iter::once(&started).chain(&events));
            }
        }
        if !state.has_work_signal() {
            tracing::debug!(instance_id = id, "Events carry only markers, skipping tier");
            return None;
        }

        let latest_ts = state.latest_timestamp.unwrap_or(latest.timestamp);

        let mut work_state = state.to_work_state(&instance.project, latest_ts);
        work_state.environment.host = Some(instance.host_location.clone());
        work_state.last_commands = self.recent_summaries(id);

        Some(TierResult {
            source: ReconstructionSource::Events,
            checks: ValidityChecks {
                replay_degraded: checks.replay_degraded,
                ..self.validity(&work_state)
            },
            age_minutes: now.signed_duration_since(latest_ts).num_minutes().max(0),
            checkpoint_type: None,
            work_state,
        })
    }

    fn from_commands(
        &self,
        instance: &Instance,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Option<TierResult> {
        let commands = match self
            .db()
            .recent_commands(&instance.instance_id, INFERENCE_COMMANDS)
        {
            Ok(commands) if !commands.is_empty() => commands,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(
                    instance_id = %instance.instance_id,
                    error = %e,
                    "Command tier failed"
                );
                warnings.push(format!("command log lookup failed: {}", e));
                return None;
            }
        };

        let newest = commands[0].timestamp;
        let work_state = infer_from_commands(instance, &commands);

        Some(TierResult {
            source: ReconstructionSource::Commands,
            checks: self.validity(&work_state),
            age_minutes: now.signed_duration_since(newest).num_minutes().max(0),
            checkpoint_type: None,
            work_state,
        })
    }

    /// Latest `task_started` older than the replayed window
    fn task_start_before(&self, instance_id: &str, window: &[Event]) -> Option<Event> {
        let first_seq = window.first()?.sequence_num;
        match self.events.latest_of_kind(instance_id, EventKind::TaskStarted) {
            Ok(Some(event)) if event.sequence_num < first_seq => Some(event),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(instance_id, error = %e, "Task start lookup failed");
                None
            }
        }
    }

    fn recent_summaries(&self, instance_id: &str) -> Vec<CommandSummary> {
        self.db()
            .recent_commands(instance_id, MAX_EMBEDDED_COMMANDS)
            .map(|entries| entries.iter().map(CommandSummary::from).collect())
            .unwrap_or_default()
    }

    /// Each check runs independently; unknowable results carry no penalty.
    fn validity(&self, work_state: &WorkState) -> ValidityChecks {
        let Some(dir) = work_state.environment.working_directory.as_deref() else {
            return ValidityChecks::default();
        };

        let branch_missing = work_state
            .vcs_status
            .branch
            .as_deref()
            .map(|branch| self.workspace.branch_exists(dir, branch) == Some(false))
            .unwrap_or(false);

        let sampled_files_missing = work_state
            .files_modified
            .iter()
            .filter(|f| f.change != ChangeKind::Deleted)
            .take(SAMPLED_FILES)
            .any(|f| !self.workspace.file_exists(dir, &f.path));

        ValidityChecks {
            working_directory_missing: !self.workspace.directory_exists(dir),
            branch_missing,
            sampled_files_missing,
            replay_degraded: false,
        }
    }
}

/// Last resort: whatever the registry row says. Always succeeds.
fn from_registry(instance: &Instance, now: DateTime<Utc>) -> TierResult {
    let work_state = WorkState {
        current_task: instance.current_task.as_ref().map(|task| TaskDescriptor {
            id: Some(task.clone()),
            name: task.clone(),
            ..Default::default()
        }),
        environment: Environment {
            project: instance.project.clone(),
            working_directory: None,
            host: Some(instance.host_location.clone()),
        },
        snapshot_at: instance.last_heartbeat,
        ..Default::default()
    };

    TierResult {
        source: ReconstructionSource::Basic,
        work_state,
        age_minutes: now
            .signed_duration_since(instance.last_heartbeat)
            .num_minutes()
            .max(0),
        checks: ValidityChecks::default(),
        checkpoint_type: None,
    }
}

/// Heuristics over recent commands (newest first).
fn infer_from_commands(instance: &Instance, commands: &[CommandLogEntry]) -> WorkState {
    let mut files: Vec<FileChange> = Vec::new();
    let mut branch = None;
    let mut working_directory = None;
    let mut task_id = None;
    let mut important_context = Vec::new();
    let mut saw_test = false;

    for entry in commands {
        let params = &entry.parameters;

        if working_directory.is_none() {
            working_directory = ["cwd", "working_directory"]
                .iter()
                .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string);
        }

        if let Some(path) = ["file_path", "path", "notebook_path"]
            .iter()
            .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
        {
            let is_write = matches!(
                entry.tool_name.as_deref(),
                Some("Edit" | "Write" | "MultiEdit" | "NotebookEdit")
            );
            if is_write
                && files.len() < MAX_INFERRED_FILES
                && !files.iter().any(|f| f.path == path)
            {
                files.push(FileChange {
                    path: path.to_string(),
                    change: ChangeKind::Modified,
                    lines_added: 0,
                    lines_removed: 0,
                });
            }
        }

        let text = params
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or(&entry.action);

        if branch.is_none() {
            if let Some(caps) = BRANCH_SWITCH.captures(text) {
                branch = Some(caps[1].to_string());
            }
        }

        if !saw_test && TEST_COMMAND.is_match(text) {
            saw_test = true;
            important_context.push(format!(
                "last test command {}: {}",
                if entry.success { "succeeded" } else { "failed" },
                text
            ));
        }

        if task_id.is_none() {
            task_id = entry
                .tags
                .iter()
                .find_map(|t| t.strip_prefix("task:"))
                .map(str::to_string);
        }

        if !entry.success && important_context.len() < 5 {
            important_context.push(format!("failed: {}", entry.action));
        }
    }

    let current_task = match (task_id, &instance.current_task) {
        (Some(id), _) => Some(TaskDescriptor {
            name: instance.current_task.clone().unwrap_or_else(|| id.clone()),
            id: Some(id),
            ..Default::default()
        }),
        (None, Some(task)) => Some(TaskDescriptor {
            id: Some(task.clone()),
            name: task.clone(),
            ..Default::default()
        }),
        (None, None) => None,
    };

    WorkState {
        current_task,
        files_modified: files,
        vcs_status: VcsStatus {
            branch,
            ..Default::default()
        },
        last_commands: commands
            .iter()
            .take(MAX_EMBEDDED_COMMANDS)
            .map(CommandSummary::from)
            .collect(),
        environment: Environment {
            project: instance.project.clone(),
            working_directory,
            host: Some(instance.host_location.clone()),
        },
        important_context,
        snapshot_at: commands[0].timestamp,
        ..Default::default()
    }
}

fn summarize(source: ReconstructionSource, ws: &WorkState) -> String {
    let mut parts = vec![format!("from {}", source)];
    match &ws.current_task {
        Some(task) if task.status.is_empty() => parts.push(format!("task '{}'", task.name)),
        Some(task) => parts.push(format!("task '{}' ({})", task.name, task.status)),
        None => parts.push("no task recorded".to_string()),
    }
    if !ws.files_modified.is_empty() {
        parts.push(format!("{} modified file(s)", ws.files_modified.len()));
    }
    if let Some(branch) = &ws.vcs_status.branch {
        parts.push(format!("branch {}", branch));
    }
    parts.join(", ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::CheckpointManager;
    use crate::db::NewEventRow;
    use crate::event_store::EventPayload;
    use crate::types::{NewCommand, Role};
    use serde_json::json;
    use std::collections::HashSet;

    /// In-memory stand-in for the session's machine
    #[derive(Default)]
    pub(crate) struct FakeWorkspace {
        pub dirs: HashSet<String>,
        pub branches: HashSet<String>,
        pub files: HashSet<String>,
    }

    impl Workspace for FakeWorkspace {
        fn directory_exists(&self, dir: &str) -> bool {
            self.dirs.contains(dir)
        }

        fn branch_exists(&self, _dir: &str, branch: &str) -> Option<bool> {
            Some(self.branches.contains(branch))
        }

        fn file_exists(&self, _dir: &str, path: &str) -> bool {
            self.files.contains(path)
        }
    }

    struct Fixture {
        registry: Arc<InstanceRegistry>,
        reconstructor: Reconstructor,
        instance: Instance,
        t0: DateTime<Utc>,
    }

    fn fixture(workspace: FakeWorkspace) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let registry = Arc::new(InstanceRegistry::new(Arc::new(db)));
        let t0 = Utc::now() - Duration::hours(3);
        let instance = registry
            .register_at("demo", Role::ProjectSupervisor, "local", t0)
            .unwrap();
        Fixture {
            reconstructor: Reconstructor::new(Arc::clone(&registry), Arc::new(workspace)),
            registry,
            instance,
            t0,
        }
    }

    #[test]
    fn test_unknown_instance_is_the_only_error() {
        let fx = fixture(FakeWorkspace::default());
        let err = fx.reconstructor.reconstruct("ghost-PS-000000").unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound(_)));
    }

    #[test]
    fn test_fresh_checkpoint_wins() {
        let fx = fixture(FakeWorkspace::default());
        let manager = CheckpointManager::new(Arc::clone(fx.registry.database()));
        let created_at = fx.t0 + Duration::minutes(10);
        let state = WorkState {
            current_task: Some(TaskDescriptor {
                name: "wire auth".into(),
                status: "implementation".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        manager
            .create_at(
                &fx.instance.instance_id,
                CheckpointType::ContextPressure,
                Some(45),
                &state,
                None,
                created_at,
            )
            .unwrap();

        let ctx = fx
            .reconstructor
            .reconstruct_at(&fx.instance.instance_id, created_at + Duration::minutes(3))
            .unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Checkpoint);
        assert_eq!(ctx.confidence_score, 100);
        assert_eq!(ctx.checkpoint_type, Some(CheckpointType::ContextPressure));
        assert!(ctx.is_auto_resume_safe());
    }

    #[test]
    fn test_old_checkpoint_falls_through_to_commands() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        let manager = CheckpointManager::new(Arc::clone(fx.registry.database()));
        manager
            .create_at(
                id,
                CheckpointType::Manual,
                None,
                &WorkState::default(),
                None,
                fx.t0,
            )
            .unwrap();

        let now = fx.t0 + Duration::minutes(90);
        let mut edit = NewCommand::tool_call(id, "Edit", json!({"file_path": "src/auth.rs"}));
        edit.tags = vec!["task:T-42".into()];
        fx.registry
            .database()
            .insert_command(&edit, now - Duration::minutes(1))
            .unwrap();

        // The checkpoint_created marker alone does not make the events tier apply.
        let ctx = fx.reconstructor.reconstruct_at(id, now).unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Commands);
        assert_eq!(ctx.confidence_score, 70);
        assert_eq!(
            ctx.work_state.current_task.as_ref().unwrap().id.as_deref(),
            Some("T-42")
        );
        assert_eq!(ctx.work_state.files_modified[0].path, "src/auth.rs");
        assert!(ctx.warnings.iter().any(|w| w.contains("not used")));
    }

    #[test]
    fn test_old_checkpoint_without_commands_is_basic() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        let manager = CheckpointManager::new(Arc::clone(fx.registry.database()));
        manager
            .create_at(
                id,
                CheckpointType::Manual,
                None,
                &WorkState::default(),
                None,
                fx.t0,
            )
            .unwrap();

        let ctx = fx
            .reconstructor
            .reconstruct_at(id, fx.t0 + Duration::minutes(90))
            .unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Basic);
    }

    #[test]
    fn test_task_start_beyond_chain_limit_is_kept() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        let events = EventStore::new(Arc::clone(fx.registry.database()));
        let at = fx.t0;
        events
            .emit_at(id, &EventPayload::task_started("wire auth"), None, at)
            .unwrap();
        for i in 0..CHAIN_WALK_LIMIT + 5 {
            events
                .emit_at(id, &EventPayload::note(format!("step {}", i)), None, at)
                .unwrap();
        }

        let ctx = fx.reconstructor.reconstruct_at(id, at).unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Events);
        assert_eq!(
            ctx.work_state.current_task.as_ref().unwrap().name,
            "wire auth"
        );
    }

    #[test]
    fn test_event_replay_derives_markers() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        let events = EventStore::new(Arc::clone(fx.registry.database()));
        let at = fx.t0 + Duration::minutes(5);
        events
            .emit_raw(id, "task_started", json!({"name": "wire auth", "epic_id": "epic-003"}), None)
            .unwrap();
        events
            .emit_at(id, &EventPayload::note("use the v2 token format"), None, at)
            .unwrap();

        let ctx = fx.reconstructor.reconstruct(id).unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Events);
        let task = ctx.work_state.current_task.as_ref().unwrap();
        assert_eq!(task.epic_id.as_deref(), Some("epic-003"));
        assert!(ctx
            .work_state
            .important_context
            .iter()
            .any(|c| c.contains("v2 token")));
    }

    #[test]
    fn test_broken_chain_degrades_to_flat_scan() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        let db = fx.registry.database();
        let at = Utc::now();

        let events = EventStore::new(Arc::clone(db));
        events
            .emit_at(id, &EventPayload::task_started("wire auth"), None, at)
            .unwrap();
        let healthy = fx.reconstructor.reconstruct_at(id, at).unwrap();

        db.insert_event_next_seq(&NewEventRow {
            event_id: "evt-orphan",
            instance_id: id,
            event_type: "note_added",
            timestamp: at,
            payload: r#"{"text":"orphan"}"#,
            metadata: None,
            parent_event_id: Some("evt-gone"),
        })
        .unwrap();

        let degraded = fx.reconstructor.reconstruct_at(id, at).unwrap();
        assert_eq!(degraded.source, ReconstructionSource::Events);
        assert_eq!(
            degraded.work_state.current_task.as_ref().unwrap().name,
            "wire auth"
        );
        assert!(degraded.confidence_score < healthy.confidence_score);
        assert!(degraded.warnings.iter().any(|w| w.contains("flat scan")));
    }

    #[test]
    fn test_command_inference() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        let db = fx.registry.database();

        let mut checkout = NewCommand::explicit(id, "git checkout -b feat/login");
        checkout.tags = vec!["task:T-42".into()];
        db.insert_command(&checkout, fx.t0).unwrap();
        db.insert_command(
            &NewCommand::tool_call(id, "Edit", json!({"file_path": "src/login.rs"})),
            fx.t0 + Duration::minutes(1),
        )
        .unwrap();
        let mut tests = NewCommand::explicit(id, "cargo test");
        tests.success = false;
        db.insert_command(&tests, fx.t0 + Duration::minutes(2)).unwrap();

        let ctx = fx
            .reconstructor
            .reconstruct_at(id, fx.t0 + Duration::minutes(2))
            .unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Commands);
        assert_eq!(ctx.confidence_score, 70);
        assert_eq!(ctx.work_state.vcs_status.branch.as_deref(), Some("feat/login"));
        assert_eq!(ctx.work_state.files_modified[0].path, "src/login.rs");
        assert_eq!(
            ctx.work_state.current_task.as_ref().unwrap().id.as_deref(),
            Some("T-42")
        );
        assert!(ctx
            .work_state
            .important_context
            .iter()
            .any(|c| c.contains("last test command failed")));
    }

    #[test]
    fn test_basic_fallback_always_succeeds() {
        let fx = fixture(FakeWorkspace::default());
        let id = fx.instance.instance_id.as_str();
        fx.registry
            .update_heartbeat_at(id, 30, Some("T-9"), fx.t0)
            .unwrap();

        let ctx = fx
            .reconstructor
            .reconstruct_at(id, fx.t0 + Duration::minutes(90))
            .unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Basic);
        assert_eq!(ctx.confidence_score, 30);
        assert_eq!(ctx.work_state.current_task.unwrap().name, "T-9");
    }

    #[test]
    fn test_validity_checks_use_workspace() {
        let workspace = FakeWorkspace {
            dirs: HashSet::from(["/work/demo".to_string()]),
            branches: HashSet::new(),
            files: HashSet::from(["src/lib.rs".to_string()]),
        };
        let fx = fixture(workspace);
        let manager = CheckpointManager::new(Arc::clone(fx.registry.database()));
        let state = WorkState {
            environment: Environment {
                project: "demo".into(),
                working_directory: Some("/work/demo".into()),
                host: None,
            },
            vcs_status: VcsStatus {
                branch: Some("feat/gone".into()),
                ..Default::default()
            },
            files_modified: vec![
                FileChange {
                    path: "src/lib.rs".into(),
                    change: ChangeKind::Modified,
                    lines_added: 1,
                    lines_removed: 0,
                },
                FileChange {
                    path: "src/old.rs".into(),
                    change: ChangeKind::Deleted,
                    lines_added: 0,
                    lines_removed: 9,
                },
            ],
            ..Default::default()
        };
        let at = Utc::now();
        manager
            .create_at(
                &fx.instance.instance_id,
                CheckpointType::Manual,
                None,
                &state,
                None,
                at,
            )
            .unwrap();

        let ctx = fx.reconstructor.reconstruct_at(&fx.instance.instance_id, at).unwrap();
        assert_eq!(ctx.source, ReconstructionSource::Checkpoint);
        // Branch gone: -5. Deleted files are not sampled.
        assert_eq!(ctx.confidence_score, 95);
        assert_eq!(ctx.warnings.len(), 1);
    }
}
