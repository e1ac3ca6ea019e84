//! Command log sink
//!
//! Records every discrete action a session takes. Entries are a secondary
//! signal used when no checkpoint or event history is available, so
//! everything is sanitized before it touches the store: values under
//! sensitive keys are redacted, recognizable secrets are masked, and long
//! strings are truncated.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::failures::{BackgroundFailure, FailureReporter};
use crate::format::truncate_chars;
use crate::types::{CommandLogEntry, NewCommand};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Max characters kept per string parameter
pub const MAX_PARAM_CHARS: usize = 500;
/// Max characters kept of a command result
pub const MAX_RESULT_CHARS: usize = 1000;

const REDACTED: &str = "[REDACTED]";

/// Key fragments whose values are never stored
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
    "access_key",
    "cookie",
];

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bbearer\s+[a-z0-9._~+/=-]+",
        r"\bsk-[A-Za-z0-9_-]{16,}",
        r"\bgh[pousr]_[A-Za-z0-9]{20,}",
        r"\bAKIA[0-9A-Z]{16}\b",
        r"(?i)\b(password|passwd|token|secret|api[_-]?key)\s*[=:]\s*\S+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|k| key.contains(k))
}

/// Mask secrets embedded in free text.
pub fn mask_secrets(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, REDACTED).into_owned();
        }
    }
    out
}

/// Sanitize a parameter tree in place of the caller's copy.
pub fn sanitize_parameters(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_parameters(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_parameters).collect()),
        Value::String(s) => Value::String(truncate_chars(&mask_secrets(s), MAX_PARAM_CHARS)),
        other => other.clone(),
    }
}

pub fn sanitize_result(result: &str) -> String {
    truncate_chars(&mask_secrets(result), MAX_RESULT_CHARS)
}

fn sanitize(command: &NewCommand) -> NewCommand {
    NewCommand {
        action: truncate_chars(&mask_secrets(&command.action), MAX_PARAM_CHARS),
        parameters: sanitize_parameters(&command.parameters),
        result: command.result.as_deref().map(sanitize_result),
        ..command.clone()
    }
}

pub struct CommandLogSink {
    db: Arc<Database>,
    failures: FailureReporter,
}

impl CommandLogSink {
    pub fn new(db: Arc<Database>, failures: FailureReporter) -> Self {
        Self { db, failures }
    }

    /// Sanitize and store a command. Returns the new entry id.
    pub fn record(&self, command: &NewCommand) -> Result<i64> {
        record_inner(&self.db, command)
    }

    /// Record on the blocking pool; failures go to the failure channel.
    pub fn record_detached(&self, command: NewCommand) -> JoinHandle<()> {
        let db = Arc::clone(&self.db);
        let failures = self.failures.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = record_inner(&db, &command) {
                failures.report(BackgroundFailure::new("command_log", &command.instance_id, &e));
            }
        })
    }

    /// Newest entries first
    pub fn recent(&self, instance_id: &str, limit: usize) -> Result<Vec<CommandLogEntry>> {
        self.db.recent_commands(instance_id, limit)
    }

    pub fn count(&self, instance_id: &str) -> Result<i64> {
        self.db.count_commands(instance_id)
    }

    /// Destructive purge, for tests and cleanup tooling
    pub fn delete_for_instance(&self, instance_id: &str) -> Result<usize> {
        let deleted = self.db.delete_commands(instance_id)?;
        tracing::info!(instance_id, deleted, "Purged command log");
        Ok(deleted)
    }
}

fn record_inner(db: &Database, command: &NewCommand) -> Result<i64> {
    if command.action.trim().is_empty() {
        return Err(Error::InvalidInput("command action must not be empty".to_string()));
    }
    if !db.instance_exists(&command.instance_id)? {
        return Err(Error::InstanceNotFound(command.instance_id.clone()));
    }

    let sanitized = sanitize(command);
    let id = db.insert_command(&sanitized, Utc::now())?;
    tracing::debug!(
        instance_id = %command.instance_id,
        action = %sanitized.action,
        id,
        "Recorded command"
    );
    Ok(id)
}
