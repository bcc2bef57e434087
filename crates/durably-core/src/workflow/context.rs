//! Per-invocation durable context handed to workflow functions.
//!
//! The context holds the execution's checkpoint log and open waits as loaded
//! at the start of the invocation, keyed by name. Primitives look their name
//! up here first (replay) and only run live work when nothing is recorded.
//! Cloning is cheap; parallel branches get child contexts that share the same
//! state but qualify every name with the branch prefix.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use durably_types::execution::{
    Checkpoint, CheckpointOutcome, ExecutionId, PendingWait, WaitKind,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::repository::box_execution::BoxExecutionRepository;
use crate::repository::execution::AppendOutcome;

use super::clock::{Clock, add_delay};
use super::error::DurableError;
use super::scheduler::WakeScheduler;

struct Shared {
    execution_id: ExecutionId,
    repo: Arc<BoxExecutionRepository>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn WakeScheduler>,
    checkpoints: DashMap<String, Checkpoint>,
    waits: DashMap<String, PendingWait>,
}

/// Handle through which workflow code reaches the durable primitives.
///
/// See `step`, `wait_for_callback`, `wait_for_condition` and `parallel`.
#[derive(Clone)]
pub struct DurableContext {
    shared: Arc<Shared>,
    prefix: String,
}

impl DurableContext {
    pub(crate) fn new(
        execution_id: ExecutionId,
        repo: Arc<BoxExecutionRepository>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn WakeScheduler>,
        checkpoints: Vec<Checkpoint>,
        waits: Vec<PendingWait>,
    ) -> Self {
        let shared = Shared {
            execution_id,
            repo,
            clock,
            scheduler,
            checkpoints: checkpoints.into_iter().map(|c| (c.name.clone(), c)).collect(),
            waits: waits.into_iter().map(|w| (w.name.clone(), w)).collect(),
        };
        Self {
            shared: Arc::new(shared),
            prefix: String::new(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.shared.execution_id
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// Full checkpoint name for an operation started from this context.
    pub(crate) fn qualify(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// Context whose operations are named under `prefix`.
    pub(crate) fn child(&self, prefix: String) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            prefix,
        }
    }

    pub(crate) fn checkpoint(&self, name: &str) -> Option<Checkpoint> {
        self.shared.checkpoints.get(name).map(|c| c.clone())
    }

    pub(crate) fn pending_wait(&self, name: &str) -> Option<PendingWait> {
        self.shared.waits.get(name).map(|w| w.clone())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Persist a checkpoint and return the authoritative one.
    ///
    /// If another invocation already wrote a checkpoint with the same name,
    /// that one wins and is returned instead.
    pub(crate) async fn record(&self, checkpoint: Checkpoint) -> Result<Checkpoint, DurableError> {
        let id = self.shared.execution_id;
        let stored = match self.shared.repo.append_checkpoint(&checkpoint).await? {
            AppendOutcome::Appended => {
                tracing::debug!(
                    execution_id = %id,
                    name = %checkpoint.name,
                    kind = %checkpoint.kind,
                    attempts = checkpoint.attempts,
                    success = checkpoint.is_success(),
                    "checkpoint written"
                );
                checkpoint
            }
            AppendOutcome::AlreadyExists => {
                let winner = self
                    .shared
                    .repo
                    .list_checkpoints(&id)
                    .await?
                    .into_iter()
                    .find(|c| c.name == checkpoint.name)
                    .ok_or_else(|| DurableError::NotFound(format!("checkpoint '{}'", checkpoint.name)))?;
                tracing::debug!(
                    execution_id = %id,
                    name = %checkpoint.name,
                    "checkpoint already recorded by another invocation"
                );
                winner
            }
        };

        self.shared.repo.delete_pending_wait(&id, &stored.name).await?;
        self.shared.waits.remove(&stored.name);
        self.shared
            .checkpoints
            .insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    /// Persist an open wait, ask the host for a wake-up, and suspend.
    pub(crate) async fn suspend<T>(&self, wait: PendingWait) -> Result<T, DurableError> {
        self.shared.repo.upsert_pending_wait(&wait).await?;
        if let Some(at) = wait.next_wake() {
            self.shared.scheduler.schedule(wait.execution_id, at);
        }
        tracing::debug!(
            execution_id = %wait.execution_id,
            name = %wait.name,
            kind = %wait.kind,
            attempt = wait.attempt,
            wake_at = ?wait.next_wake(),
            "suspending on pending wait"
        );
        self.shared.waits.insert(wait.name.clone(), wait);
        Err(DurableError::Suspended)
    }

    /// A `Retry` wait that wakes the execution after `delay`.
    pub(crate) fn retry_wait(
        &self,
        name: &str,
        attempt: u32,
        delay: Duration,
        callback_token: Option<String>,
    ) -> PendingWait {
        let now = self.now();
        PendingWait {
            execution_id: self.shared.execution_id,
            name: name.to_string(),
            kind: WaitKind::Retry,
            callback_token,
            deadline: None,
            wake_at: Some(add_delay(now, delay)),
            attempt,
            state: None,
            created_at: now,
        }
    }
}

/// Return a checkpoint's recorded outcome.
pub(crate) fn replay<T: DeserializeOwned>(checkpoint: &Checkpoint) -> Result<T, DurableError> {
    match &checkpoint.outcome {
        CheckpointOutcome::Succeeded { result } => Ok(serde_json::from_value(result.clone())?),
        CheckpointOutcome::Failed { failure } => Err(DurableError::from_failure(
            &checkpoint.name,
            failure,
            checkpoint.attempts,
        )),
    }
}

/// Fresh single-use callback token.
pub(crate) fn new_callback_token() -> String {
    Uuid::now_v7().to_string()
}

/// Whether a wait still has time to run before it may be re-evaluated.
pub(crate) fn not_yet_due(wait: &PendingWait, now: DateTime<Utc>) -> bool {
    wait.wake_at.is_some_and(|t| t > now)
}
