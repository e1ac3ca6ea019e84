//! # tether-core
//!
//! Core library for tether - session continuity for long-running agent sessions.
//!
//! This library provides:
//! - An instance registry with heartbeat-derived liveness
//! - An append-only, per-instance event log with replay
//! - Checkpoints of work state, plus a sanitized command log
//! - Tiered context reconstruction with a confidence score
//! - Hint-based resolution behind the `resume <hint>` protocol
//! - Configuration, logging and SQLite storage
//!
//! ## Architecture
//!
//! Writes flow one way: session activity lands in the command log and the
//! event store, and occasionally in a checkpoint. Reads fan out: a resume
//! request goes to the resolver, then the reconstructor, which scores its
//! answer and renders a recovery brief.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_core::{Config, Database, InstanceRegistry, Role};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let registry = InstanceRegistry::from_config(Arc::new(db), &config.registry);
//! let instance = registry
//!     .register("odin", Role::ProjectSupervisor, "local")
//!     .expect("failed to register");
//! println!("{}", instance.instance_id);
//! ```

// Re-export commonly used items at the crate root
pub use checkpoint::{CheckpointManager, WorkStateSerializer};
pub use command_log::CommandLogSink;
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use event_store::{EventKind, EventPayload, EventQuery, EventStore};
pub use failures::{BackgroundFailure, FailureReceiver, FailureReporter};
pub use heartbeat::HeartbeatManager;
pub use reconstruct::{FsWorkspace, Reconstructor, Workspace};
pub use registry::{InstanceRegistry, ListFilter};
pub use resolver::{InstanceResolver, Resolution};
pub use resume::{ResumeOutcome, ResumeService};
pub use types::*;

// Public modules
pub mod brief;
pub mod checkpoint;
pub mod command_log;
pub mod confidence;
pub mod config;
pub mod db;
pub mod error;
pub mod event_store;
pub mod failures;
pub mod footer;
pub mod format;
pub mod git;
pub mod heartbeat;
pub mod id;
pub mod logging;
pub mod reconstruct;
pub mod registry;
pub mod resolver;
pub mod resume;
pub mod types;
