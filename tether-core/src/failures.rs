//! Background failure reporting
//!
//! Fire-and-forget writes (heartbeats, command logging) never surface errors
//! to their caller. Instead each failure is logged and pushed into a bounded
//! channel that an operator-facing consumer can drain and alert on. Sending
//! never blocks: when the channel is full or nobody is listening, the failure
//! is counted as dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One swallowed failure from a detached write
#[derive(Debug, Clone, Serialize)]
pub struct BackgroundFailure {
    /// Which detached path failed, e.g. "heartbeat"
    pub operation: &'static str,
    pub instance_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl BackgroundFailure {
    pub fn new(operation: &'static str, instance_id: &str, error: &dyn std::fmt::Display) -> Self {
        Self {
            operation,
            instance_id: instance_id.to_string(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Sending half. Cheap to clone into spawned tasks.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    tx: mpsc::Sender<BackgroundFailure>,
    dropped: Arc<AtomicU64>,
}

/// Receiving half.
#[derive(Debug)]
pub struct FailureReceiver {
    rx: mpsc::Receiver<BackgroundFailure>,
    dropped: Arc<AtomicU64>,
}

/// Create a bounded failure channel.
pub fn channel(capacity: usize) -> (FailureReporter, FailureReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        FailureReporter {
            tx,
            dropped: Arc::clone(&dropped),
        },
        FailureReceiver { rx, dropped },
    )
}

impl FailureReporter {
    /// Record a failure without blocking.
    pub fn report(&self, failure: BackgroundFailure) {
        tracing::warn!(
            operation = failure.operation,
            instance_id = %failure.instance_id,
            error = %failure.message,
            "Background write failed"
        );

        match self.tx.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(dropped = total, "Failure channel unavailable, dropping report");
            }
        }
    }

    /// Failures that could not be queued
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FailureReceiver {
    /// Wait for the next failure. `None` once every reporter is gone.
    pub async fn recv(&mut self) -> Option<BackgroundFailure> {
        self.rx.recv().await
    }

    /// Take every failure currently queued without waiting.
    pub fn drain(&mut self) -> Vec<BackgroundFailure> {
        let mut out = Vec::new();
        while let Ok(failure) = self.rx.try_recv() {
            out.push(failure);
        }
        out
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
