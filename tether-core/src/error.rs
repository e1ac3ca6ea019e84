//! Error types for tether-core

use thiserror::Error;

/// Main error type for the tether-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying store error, wrapped with the operation that failed
    #[error("storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Instance not registered
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Event not found
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Checkpoint not found
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Identifier collision on registration
    #[error("duplicate instance id: {0}")]
    DuplicateId(String),

    /// Caller supplied something we refuse to store
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resume was attempted on an instance that is still heartbeating
    #[error("cannot resume an active instance: {instance_id} (last heartbeat {age_secs}s ago)")]
    ActiveInstance { instance_id: String, age_secs: i64 },

    /// Broken internal invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a store error with the name of the operation that produced it.
    pub fn storage(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
        move |source| Error::Storage { operation, source }
    }

    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::InstanceNotFound(_) | Error::EventNotFound(_) | Error::CheckpointNotFound(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(source: rusqlite::Error) -> Self {
        Error::Storage {
            operation: "query",
            source,
        }
    }
}

/// Result type alias for tether-core
pub type Result<T> = std::result::Result<T, Error>;
