//! Event kinds and their typed payloads
//!
//! Every kind has a statically known payload shape. Rows whose stored type
//! this build does not know, or whose payload no longer matches the shape,
//! decode to [`EventPayload::Unrecognized`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Coarse grouping of event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Lifecycle,
    Task,
    Test,
    Vcs,
    System,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Lifecycle => "lifecycle",
            EventCategory::Task => "task",
            EventCategory::Test => "test",
            EventCategory::Vcs => "vcs",
            EventCategory::System => "system",
        }
    }
}

// ============================================
// Lifecycle payloads
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStarted {
    pub project: String,
    pub role: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceResumed {
    /// Instance whose work was picked up, when different from the emitter
    pub from_instance_id: Option<String>,
    pub hint: Option<String>,
    pub confidence: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancePaused {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceClosed {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextThreshold {
    pub context_percent: u8,
    pub threshold: Option<u8>,
}

// ============================================
// Task payloads
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: Option<String>,
    pub name: String,
    pub epic_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: Option<String>,
    pub name: Option<String>,
    /// Free-form phase, e.g. "implementation", "testing"
    pub status: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFailed {
    pub task_id: Option<String>,
    pub name: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskBlocked {
    pub task_id: Option<String>,
    pub name: Option<String>,
    pub reason: String,
}

// ============================================
// Test payloads
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestsStarted {
    pub suite: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestsPassed {
    pub suite: Option<String>,
    #[serde(default)]
    pub passed: u32,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestsFailed {
    pub suite: Option<String>,
    #[serde(default)]
    pub passed: u32,
    pub failed: u32,
    /// Names of failing tests, if known
    #[serde(default)]
    pub failures: Vec<String>,
}

// ============================================
// Version-control payloads
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchCreated {
    pub branch: String,
    pub base: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitCreated {
    pub sha: String,
    pub message: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchPushed {
    pub branch: String,
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestOpened {
    pub branch: Option<String>,
    pub number: Option<u64>,
    pub url: Option<String>,
    pub title: Option<String>,
}

// ============================================
// System payloads
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointCreated {
    pub checkpoint_id: String,
    pub checkpoint_type: String,
    pub sequence_num: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRaised {
    pub message: String,
    pub source: Option<String>,
    #[serde(default)]
    pub recoverable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteAdded {
    pub text: String,
}

/// Declares the closed set of kinds, their categories and payload types.
macro_rules! event_kinds {
    ($( $variant:ident => $name:literal, $category:ident, $payload:ty; )*) => {
        /// The closed enumeration of event kinds
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum EventKind {
            $( $variant, )*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[ $( EventKind::$variant, )* ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( EventKind::$variant => $name, )*
                }
            }

            pub fn category(&self) -> EventCategory {
                match self {
                    $( EventKind::$variant => EventCategory::$category, )*
                }
            }
        }

        impl FromStr for EventKind {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(EventKind::$variant), )*
                    _ => Err(format!("unknown event type: {}", s)),
                }
            }
        }

        /// Payload of one event, tagged by kind
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventPayload {
            $( $variant($payload), )*
            /// Stored by a newer build, or no longer matching its shape
            Unrecognized { event_type: String, data: Value },
        }

        impl EventPayload {
            /// `None` for unrecognized payloads
            pub fn kind(&self) -> Option<EventKind> {
                match self {
                    $( EventPayload::$variant(_) => Some(EventKind::$variant), )*
                    EventPayload::Unrecognized { .. } => None,
                }
            }

            /// Stored type string
            pub fn event_type(&self) -> &str {
                match self {
                    $( EventPayload::$variant(_) => $name, )*
                    EventPayload::Unrecognized { event_type, .. } => event_type,
                }
            }

            /// Payload body as stored in the `payload` column
            pub fn to_data(&self) -> serde_json::Result<Value> {
                match self {
                    $( EventPayload::$variant(p) => serde_json::to_value(p), )*
                    EventPayload::Unrecognized { data, .. } => Ok(data.clone()),
                }
            }

            /// Decode a body that must match `kind`'s shape
            pub fn from_data(kind: EventKind, data: Value) -> serde_json::Result<Self> {
                match kind {
                    $( EventKind::$variant => serde_json::from_value(data).map(EventPayload::$variant), )*
                }
            }
        }
    };
}

event_kinds! {
    InstanceStarted   => "instance_started",    Lifecycle, InstanceStarted;
    InstanceResumed   => "instance_resumed",    Lifecycle, InstanceResumed;
    InstancePaused    => "instance_paused",     Lifecycle, InstancePaused;
    InstanceClosed    => "instance_closed",     Lifecycle, InstanceClosed;
    ContextThreshold  => "context_threshold",   Lifecycle, ContextThreshold;
    TaskStarted       => "task_started",        Task,      TaskStarted;
    TaskProgress      => "task_progress",       Task,      TaskProgress;
    TaskCompleted     => "task_completed",      Task,      TaskCompleted;
    TaskFailed        => "task_failed",         Task,      TaskFailed;
    TaskBlocked       => "task_blocked",        Task,      TaskBlocked;
    TestsStarted      => "tests_started",       Test,      TestsStarted;
    TestsPassed       => "tests_passed",        Test,      TestsPassed;
    TestsFailed       => "tests_failed",        Test,      TestsFailed;
    BranchCreated     => "branch_created",      Vcs,       BranchCreated;
    CommitCreated     => "commit_created",      Vcs,       CommitCreated;
    BranchPushed      => "branch_pushed",       Vcs,       BranchPushed;
    PullRequestOpened => "pull_request_opened", Vcs,       PullRequestOpened;
    CheckpointCreated => "checkpoint_created",  System,    CheckpointCreated;
    ErrorRaised       => "error_raised",        System,    ErrorRaised;
    NoteAdded         => "note_added",          System,    NoteAdded;
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EventPayload {
    /// Decode a stored row. Never fails.
    pub fn decode(event_type: &str, data: Value) -> Self {
        match event_type.parse::<EventKind>() {
            Ok(kind) => match Self::from_data(kind, data.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(
                        event_type,
                        error = %e,
                        "Stored payload does not match its kind"
                    );
                    EventPayload::Unrecognized {
                        event_type: event_type.to_string(),
                        data,
                    }
                }
            },
            Err(_) => EventPayload::Unrecognized {
                event_type: event_type.to_string(),
                data,
            },
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        EventPayload::NoteAdded(NoteAdded { text: text.into() })
    }

    pub fn task_started(name: impl Into<String>) -> Self {
        EventPayload::TaskStarted(TaskStarted {
            name: name.into(),
            ..Default::default()
        })
    }
}

/// Serializes as the bare payload body; the kind travels beside it.
impl Serialize for EventPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_data()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// Optional metadata attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Causal parent. Defaults to the instance's previous event on emit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Who emitted the event, e.g. "cli", "hook"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventMetadata {
    pub fn with_parent(parent_event_id: impl Into<String>) -> Self {
        Self {
            parent_event_id: Some(parent_event_id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parent_event_id.is_none()
            && self.correlation_id.is_none()
            && self.source.is_none()
            && self.extra.is_empty()
    }
}
