//! Wake-up scheduling seam between the engine and its host.
//!
//! When an execution suspends on a deadline or a delay, the engine asks the
//! scheduler to invoke it again at that time. Delivery is best-effort: hosts
//! also sweep `list_due_waits` so a lost request only delays the wake-up.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use durably_types::execution::ExecutionId;
use tokio::sync::mpsc;

/// A request to re-invoke an execution at or after `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeRequest {
    pub execution_id: ExecutionId,
    pub at: DateTime<Utc>,
}

/// Host hook for future invocations.
pub trait WakeScheduler: Send + Sync {
    fn schedule(&self, execution_id: ExecutionId, at: DateTime<Utc>);
}

/// Drops every request; the host relies on sweeping due waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWakeScheduler;

impl WakeScheduler for NoopWakeScheduler {
    fn schedule(&self, _execution_id: ExecutionId, _at: DateTime<Utc>) {}
}

// ---------------------------------------------------------------------------
// ChannelWakeScheduler
// ---------------------------------------------------------------------------

/// Forwards requests over an unbounded channel to a worker task.
#[derive(Debug, Clone)]
pub struct ChannelWakeScheduler {
    tx: mpsc::UnboundedSender<WakeRequest>,
}

impl ChannelWakeScheduler {
    /// Create the scheduler and the receiver the worker drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WakeRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WakeScheduler for ChannelWakeScheduler {
    fn schedule(&self, execution_id: ExecutionId, at: DateTime<Utc>) {
        if self.tx.send(WakeRequest { execution_id, at }).is_err() {
            tracing::warn!(
                execution_id = %execution_id,
                "wake-up worker gone, request dropped"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingWakeScheduler
// ---------------------------------------------------------------------------

/// Keeps every request in memory. Used to drive executions in tests.
#[derive(Debug, Default)]
pub struct RecordingWakeScheduler {
    requests: Mutex<Vec<WakeRequest>>,
}

impl RecordingWakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<WakeRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain the recorded requests.
    pub fn take(&self) -> Vec<WakeRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl WakeScheduler for RecordingWakeScheduler {
    fn schedule(&self, execution_id: ExecutionId, at: DateTime<Utc>) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(WakeRequest { execution_id, at });
    }
}
