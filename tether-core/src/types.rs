//! Core domain types for tether
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Instance** | One registered, independently liveness-tracked session |
//! | **Heartbeat** | Periodic liveness update; absence beyond a threshold marks an instance stale |
//! | **Stale** | Not closed, but silent past the threshold; eligible for resume |
//! | **Checkpoint** | A full, self-contained snapshot of work state at a point in time |
//! | **Work state** | What a session was doing: task, files, VCS, recent commands |
//! | **Reconstruction source** | Which tier (checkpoint, events, commands, basic) produced a context |
//!
//! Event types live in [`crate::event_store`] because their payloads are a
//! tagged union owned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Instances
// ============================================

/// Coordinator role a session plays. Encoded into the instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Coordinates work inside a single project
    ProjectSupervisor,
    /// Coordinates across the fleet of projects
    FleetSupervisor,
}

impl Role {
    /// Short code used in identifiers and storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ProjectSupervisor => "PS",
            Role::FleetSupervisor => "FS",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::ProjectSupervisor => "project supervisor",
            Role::FleetSupervisor => "fleet supervisor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PS" | "ps" | "project" | "project_supervisor" => Ok(Role::ProjectSupervisor),
            "FS" | "fs" | "fleet" | "fleet_supervisor" => Ok(Role::FleetSupervisor),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// Liveness status, always derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Heartbeat within the threshold window
    Active,
    /// Open, but silent past the threshold
    Stale,
    /// Closed for good
    Closed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Stale => "stale",
            InstanceStatus::Closed => "closed",
        }
    }

    /// Compute status from the stored liveness columns.
    ///
    /// Pure in `now - last_heartbeat` and `closed_at`; nothing is written back.
    pub fn derive(
        last_heartbeat: DateTime<Utc>,
        closed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Self {
        if closed_at.is_some() {
            return InstanceStatus::Closed;
        }
        if now.signed_duration_since(last_heartbeat).num_seconds() > stale_after_secs {
            InstanceStatus::Stale
        } else {
            InstanceStatus::Active
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One registered session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// `{project}-{role}-{hash6}`
    pub instance_id: String,
    pub project: String,
    pub role: Role,
    /// Derived from `last_heartbeat` / `closed_at` when the row was read
    pub status: InstanceStatus,
    /// Resource-pressure proxy, 0-100
    pub context_percent: u8,
    /// Reference to an external work unit
    pub current_task: Option<String>,
    pub host_location: String,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Seconds since the last heartbeat
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_heartbeat).num_seconds()
    }

    /// Minutes between registration and `now` (or close time)
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        let end = self.closed_at.unwrap_or(now);
        end.signed_duration_since(self.created_at).num_minutes()
    }

    /// The 6-character hash suffix, used as a short resume hint
    pub fn short_hash(&self) -> &str {
        self.instance_id
            .rsplit('-')
            .next()
            .unwrap_or(self.instance_id.as_str())
    }
}

// ============================================
// Command log
// ============================================

/// How a command-log entry was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Captured from a tool/API invocation
    ToolCall,
    /// Explicitly logged by the session
    Explicit,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::ToolCall => "tool_call",
            CommandType::Explicit => "explicit",
        }
    }
}

impl std::str::FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_call" => Ok(CommandType::ToolCall),
            "explicit" => Ok(CommandType::Explicit),
            _ => Err(format!("unknown command type: {}", s)),
        }
    }
}

/// A command as submitted by a session, before sanitization.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub instance_id: String,
    pub command_type: CommandType,
    pub action: String,
    pub tool_name: Option<String>,
    pub parameters: serde_json::Value,
    pub result: Option<String>,
    pub success: bool,
    pub execution_time_ms: i64,
    pub tags: Vec<String>,
}

impl NewCommand {
    /// A tool invocation with the given parameters
    pub fn tool_call(instance_id: &str, tool_name: &str, parameters: serde_json::Value) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            command_type: CommandType::ToolCall,
            action: tool_name.to_string(),
            tool_name: Some(tool_name.to_string()),
            parameters,
            result: None,
            success: true,
            execution_time_ms: 0,
            tags: vec![],
        }
    }

    /// An explicitly logged operation
    pub fn explicit(instance_id: &str, action: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            command_type: CommandType::Explicit,
            action: action.to_string(),
            tool_name: None,
            parameters: serde_json::json!({}),
            result: None,
            success: true,
            execution_time_ms: 0,
            tags: vec![],
        }
    }
}

/// A stored, sanitized command-log entry. Secondary signal, not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub id: i64,
    pub instance_id: String,
    pub command_type: CommandType,
    pub action: String,
    pub tool_name: Option<String>,
    pub parameters: serde_json::Value,
    pub result: Option<String>,
    pub success: bool,
    pub execution_time_ms: i64,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================
// Checkpoints
// ============================================

/// What triggered a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    /// Context window filling up
    ContextPressure,
    /// A task just finished
    TaskCompletion,
    /// Requested by hand
    Manual,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::ContextPressure => "context_pressure",
            CheckpointType::TaskCompletion => "task_completion",
            CheckpointType::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CheckpointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "context_pressure" | "context" => Ok(CheckpointType::ContextPressure),
            "task_completion" | "task" => Ok(CheckpointType::TaskCompletion),
            "manual" => Ok(CheckpointType::Manual),
            _ => Err(format!("unknown checkpoint type: {}", s)),
        }
    }
}

/// Checkpoint bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Free-form trigger description
    #[serde(default)]
    pub trigger: Option<String>,
    /// Event that caused the checkpoint, if any
    #[serde(default)]
    pub event_id: Option<String>,
    /// Serialized work-state size, filled in by the manager
    #[serde(default)]
    pub size_bytes: u64,
}

/// A full snapshot of a session's work state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub instance_id: String,
    pub checkpoint_type: CheckpointType,
    /// Per-instance counter, independent of event sequence numbers
    pub sequence_num: i64,
    pub context_percent: Option<u8>,
    pub work_state: WorkState,
    pub metadata: CheckpointMetadata,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint listing row (no embedded work state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub checkpoint_type: CheckpointType,
    pub sequence_num: i64,
    pub context_percent: Option<u8>,
    pub task_name: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Work state
// ============================================

/// The task a session was working on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDescriptor {
    pub id: Option<String>,
    pub name: String,
    /// Free-form phase, e.g. "implementation", "testing"
    pub status: String,
    pub epic_id: Option<String>,
    pub elapsed_minutes: Option<i64>,
    pub tests_passed: u32,
    pub tests_failed: u32,
}

/// Kind of change to a file in the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Untracked => "untracked",
        }
    }
}

/// One row of the modified-files ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change: ChangeKind,
    #[serde(default)]
    pub lines_added: u32,
    #[serde(default)]
    pub lines_removed: u32,
}

/// Version-control status at capture time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsStatus {
    pub branch: Option<String>,
    pub staged: u32,
    pub unstaged: u32,
    pub untracked: u32,
    pub commit_count: u32,
}

impl VcsStatus {
    pub fn is_clean(&self) -> bool {
        self.staged == 0 && self.unstaged == 0 && self.untracked == 0
    }
}

/// Compact view of a command-log entry embedded in a work state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub action: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&CommandLogEntry> for CommandSummary {
    fn from(entry: &CommandLogEntry) -> Self {
        Self {
            action: entry.action.clone(),
            tool_name: entry.tool_name.clone(),
            success: entry.success,
            timestamp: entry.timestamp,
        }
    }
}

/// Where the session runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub project: String,
    pub working_directory: Option<String>,
    pub host: Option<String>,
}

/// Everything needed to pick a session back up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkState {
    pub current_task: Option<TaskDescriptor>,
    pub files_modified: Vec<FileChange>,
    pub vcs_status: VcsStatus,
    pub last_commands: Vec<CommandSummary>,
    pub external_document_status: Option<String>,
    pub environment: Environment,
    pub pending_tasks: Vec<String>,
    pub important_context: Vec<String>,
    pub snapshot_at: DateTime<Utc>,
}

impl Default for WorkState {
    fn default() -> Self {
        Self {
            current_task: None,
            files_modified: vec![],
            vcs_status: VcsStatus::default(),
            last_commands: vec![],
            external_document_status: None,
            environment: Environment::default(),
            pending_tasks: vec![],
            important_context: vec![],
            snapshot_at: Utc::now(),
        }
    }
}

// ============================================
// Reconstruction
// ============================================

/// Which tier produced a reconstructed context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionSource {
    Checkpoint,
    Events,
    Commands,
    Basic,
}

impl ReconstructionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconstructionSource::Checkpoint => "checkpoint",
            ReconstructionSource::Events => "events",
            ReconstructionSource::Commands => "commands",
            ReconstructionSource::Basic => "basic",
        }
    }
}

impl std::fmt::Display for ReconstructionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Answer to "what was this session doing?". Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ReconstructedContext {
    pub instance_id: String,
    pub source: ReconstructionSource,
    pub confidence_score: u8,
    pub confidence_reason: String,
    pub warnings: Vec<String>,
    pub work_state: WorkState,
    pub summary: String,
    pub age_minutes: i64,
    /// Set when the context came from a checkpoint
    pub checkpoint_type: Option<CheckpointType>,
}

impl ReconstructedContext {
    /// Scores at or above this can resume without manual verification
    pub const AUTO_RESUME_THRESHOLD: u8 = 80;

    pub fn is_auto_resume_safe(&self) -> bool {
        self.confidence_score >= Self::AUTO_RESUME_THRESHOLD
    }
}
