//! Execution engine: drives a workflow function by replaying its checkpoint log.
//!
//! # Invocation flow
//!
//! 1. Load the execution; a closed one returns its stored outcome.
//! 2. Apply the incoming callback report, if any, as a conditional checkpoint.
//! 3. Fail the execution if it outlived the execution timeout.
//! 4. Load checkpoints and pending waits into a fresh `DurableContext`.
//! 5. Run the workflow function. Recorded operations return their stored
//!    outcome; the first unrecorded one runs live.
//! 6. `Suspended` hands control back to the host; any other outcome closes
//!    the execution exactly once.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use durably_types::error::RepositoryError;
use durably_types::execution::{
    Checkpoint, CheckpointKind, CheckpointOutcome, Execution, ExecutionId, ExecutionStatus,
    FailureKind, FailureRecord, PendingWait,
};
use serde::Serialize;
use serde_json::Value;

use crate::repository::box_execution::BoxExecutionRepository;
use crate::repository::execution::{AppendOutcome, ExecutionRepository};

use super::clock::{Clock, SystemClock, add_delay};
use super::context::DurableContext;
use super::error::DurableError;
use super::scheduler::{NoopWakeScheduler, WakeScheduler};

// ---------------------------------------------------------------------------
// Workflow trait
// ---------------------------------------------------------------------------

/// A deterministic workflow function.
///
/// `run` is invoked from the top on every wake-up. All side effects and all
/// non-deterministic reads must go through the context's primitives.
pub trait Workflow: Send + Sync {
    /// Stable name stored on every execution of this workflow.
    fn name(&self) -> &str;

    fn run(
        &self,
        ctx: DurableContext,
        input: Value,
    ) -> impl Future<Output = Result<Value, DurableError>> + Send;
}

// ---------------------------------------------------------------------------
// Events and outcomes
// ---------------------------------------------------------------------------

/// What a callback reporter observed.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackReport {
    Success(Value),
    Failure(Option<String>),
}

/// External input delivered with an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    CallbackSucceeded { token: String, payload: Value },
    CallbackFailed { token: String, error: Option<String> },
    /// A scheduled wake-up with no payload.
    Wake,
}

impl ExecutionEvent {
    pub fn callback(token: impl Into<String>, report: CallbackReport) -> Self {
        let token = token.into();
        match report {
            CallbackReport::Success(payload) => ExecutionEvent::CallbackSucceeded { token, payload },
            CallbackReport::Failure(error) => ExecutionEvent::CallbackFailed { token, error },
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Waiting on the listed waits; the host must re-invoke later.
    Suspended { waits: Vec<PendingWait> },
    Succeeded { result: Value },
    Failed { error: String },
}

impl RunOutcome {
    /// The stored terminal outcome of a closed execution.
    fn from_closed(execution: &Execution) -> Self {
        match execution.status {
            ExecutionStatus::Succeeded => RunOutcome::Succeeded {
                result: execution.result.clone().unwrap_or(Value::Null),
            },
            _ => RunOutcome::Failed {
                error: execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            },
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Suspended { .. } => "suspended",
            RunOutcome::Succeeded { .. } => "succeeded",
            RunOutcome::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Engine failures that are not workflow outcomes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("execution not found: {0}")]
    NotFound(ExecutionId),

    /// No open callback owns this token (unknown, resolved, or timed out).
    #[error("unknown or already resolved callback: {0}")]
    UnknownCallback(String),

    #[error("execution belongs to workflow '{found}', not '{expected}'")]
    WorkflowMismatch { expected: String, found: String },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Default execution-level timeout: two days.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Replay-driven executor for [`Workflow`]s.
#[derive(Clone)]
pub struct ExecutionEngine {
    repo: Arc<BoxExecutionRepository>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn WakeScheduler>,
    execution_timeout: Option<Duration>,
}

impl ExecutionEngine {
    /// Engine over `repo` with the system clock and no wake-up scheduler.
    pub fn new<R: ExecutionRepository + 'static>(repo: R) -> Self {
        Self::from_shared(Arc::new(BoxExecutionRepository::new(repo)))
    }

    pub fn from_shared(repo: Arc<BoxExecutionRepository>) -> Self {
        Self {
            repo,
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(NoopWakeScheduler),
            execution_timeout: Some(DEFAULT_EXECUTION_TIMEOUT),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn WakeScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Limit how long an execution may stay running. `None` disables the limit.
    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn repository(&self) -> &BoxExecutionRepository {
        &self.repo
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Create an execution and run its first invocation.
    pub async fn start<W: Workflow>(
        &self,
        workflow: &W,
        input: Value,
    ) -> Result<(ExecutionId, RunOutcome), EngineError> {
        let execution = Execution::new(workflow.name(), input, self.clock.now());
        self.repo.create_execution(&execution).await?;
        tracing::info!(
            execution_id = %execution.id,
            workflow = workflow.name(),
            "execution started"
        );
        let outcome = self.run(workflow, &execution.id, None).await?;
        Ok((execution.id, outcome))
    }

    /// Deliver a callback report and re-invoke the owning execution.
    pub async fn deliver<W: Workflow>(
        &self,
        workflow: &W,
        token: &str,
        report: CallbackReport,
    ) -> Result<(ExecutionId, RunOutcome), EngineError> {
        let wait = self
            .repo
            .find_wait_by_token(token)
            .await?
            .ok_or_else(|| EngineError::UnknownCallback(token.to_string()))?;
        tracing::info!(
            execution_id = %wait.execution_id,
            name = %wait.name,
            success = matches!(report, CallbackReport::Success(_)),
            "callback report received"
        );
        let event = ExecutionEvent::callback(token, report);
        let outcome = self.run(workflow, &wait.execution_id, Some(event)).await?;
        Ok((wait.execution_id, outcome))
    }

    /// Re-invoke every execution that has a due wait. Returns what each did.
    ///
    /// A failure to run one execution is logged and does not stop the sweep.
    pub async fn wake_due<W: Workflow>(
        &self,
        workflow: &W,
    ) -> Result<Vec<(ExecutionId, RunOutcome)>, EngineError> {
        let due: BTreeSet<ExecutionId> = self
            .repo
            .list_due_waits(self.clock.now())
            .await?
            .into_iter()
            .map(|w| w.execution_id)
            .collect();

        let mut outcomes = Vec::with_capacity(due.len());
        for id in due {
            match self.run(workflow, &id, Some(ExecutionEvent::Wake)).await {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(e) => tracing::warn!(execution_id = %id, error = %e, "wake-up failed"),
            }
        }
        Ok(outcomes)
    }

    /// Invoke an existing execution.
    pub async fn run<W: Workflow>(
        &self,
        workflow: &W,
        id: &ExecutionId,
        event: Option<ExecutionEvent>,
    ) -> Result<RunOutcome, EngineError> {
        let execution = self
            .repo
            .get_execution(id)
            .await?
            .ok_or(EngineError::NotFound(*id))?;

        if execution.is_closed() {
            tracing::debug!(execution_id = %id, status = %execution.status, "execution already closed");
            return Ok(RunOutcome::from_closed(&execution));
        }
        if execution.workflow_name != workflow.name() {
            return Err(EngineError::WorkflowMismatch {
                expected: workflow.name().to_string(),
                found: execution.workflow_name.clone(),
            });
        }

        if let Some(event) = event {
            self.apply_event(id, event).await?;
        }

        if let Some(timeout) = self.execution_timeout {
            if add_delay(execution.started_at, timeout) <= self.clock.now() {
                let error = format!("execution timed out after {}s", timeout.as_secs());
                return self.close(&execution, Err(error)).await;
            }
        }

        let checkpoints = self.repo.list_checkpoints(id).await?;
        let waits = self.repo.list_pending_waits(id).await?;
        tracing::debug!(
            execution_id = %id,
            checkpoints = checkpoints.len(),
            waits = waits.len(),
            "replaying execution"
        );
        let ctx = DurableContext::new(
            *id,
            Arc::clone(&self.repo),
            Arc::clone(&self.clock),
            Arc::clone(&self.scheduler),
            checkpoints,
            waits,
        );

        match workflow.run(ctx, execution.input.clone()).await {
            Ok(result) => self.close(&execution, Ok(result)).await,
            Err(DurableError::Suspended) => {
                let waits = self.repo.list_pending_waits(id).await?;
                tracing::debug!(execution_id = %id, waits = waits.len(), "execution suspended");
                Ok(RunOutcome::Suspended { waits })
            }
            // Storage trouble is not a workflow outcome; leave the execution running.
            Err(DurableError::Repository(e)) => Err(EngineError::Repository(e)),
            Err(e) => self.close(&execution, Err(e.to_string())).await,
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Record a callback report as the owning wait's checkpoint.
    ///
    /// Reports for unknown tokens, other executions, or already-checkpointed
    /// names are ignored.
    async fn apply_event(&self, id: &ExecutionId, event: ExecutionEvent) -> Result<(), EngineError> {
        let (token, outcome) = match event {
            ExecutionEvent::Wake => return Ok(()),
            ExecutionEvent::CallbackSucceeded { token, payload } => {
                (token, CheckpointOutcome::Succeeded { result: payload })
            }
            ExecutionEvent::CallbackFailed { token, error } => {
                let message = error.unwrap_or_else(|| "callback reported failure".to_string());
                let failure = FailureRecord::new(FailureKind::Callback, message);
                (token, CheckpointOutcome::Failed { failure })
            }
        };

        let Some(wait) = self.repo.find_wait_by_token(&token).await? else {
            tracing::warn!(execution_id = %id, token = %token, "ignoring report for unknown or resolved callback");
            return Ok(());
        };
        if wait.execution_id != *id {
            tracing::warn!(
                execution_id = %id,
                owner = %wait.execution_id,
                "ignoring report for another execution's callback"
            );
            return Ok(());
        }

        let checkpoint = Checkpoint {
            execution_id: *id,
            name: wait.name.clone(),
            kind: CheckpointKind::Callback,
            outcome,
            attempts: wait.attempt.max(1),
            seq: 0,
            recorded_at: self.clock.now(),
        };
        match self.repo.append_checkpoint(&checkpoint).await? {
            AppendOutcome::Appended => {
                self.repo.delete_pending_wait(id, &wait.name).await?;
                tracing::info!(
                    execution_id = %id,
                    name = %wait.name,
                    success = checkpoint.is_success(),
                    "callback resolved"
                );
            }
            AppendOutcome::AlreadyExists => {
                tracing::warn!(execution_id = %id, name = %wait.name, "duplicate callback report ignored");
            }
        }
        Ok(())
    }

    /// Close the execution and clear its leftover waits.
    async fn close(
        &self,
        execution: &Execution,
        outcome: Result<Value, String>,
    ) -> Result<RunOutcome, EngineError> {
        let (status, result, error) = match &outcome {
            Ok(value) => (ExecutionStatus::Succeeded, Some(value), None),
            Err(message) => (ExecutionStatus::Failed, None, Some(message.as_str())),
        };

        let closed = self
            .repo
            .finish_execution(&execution.id, status, result, error, self.clock.now())
            .await?;
        if !closed {
            // Another invocation closed it first; its outcome stands.
            let stored = self
                .repo
                .get_execution(&execution.id)
                .await?
                .ok_or(EngineError::NotFound(execution.id))?;
            return Ok(RunOutcome::from_closed(&stored));
        }

        for wait in self.repo.list_pending_waits(&execution.id).await? {
            self.repo.delete_pending_wait(&execution.id, &wait.name).await?;
        }

        match outcome {
            Ok(result) => {
                tracing::info!(execution_id = %execution.id, "execution succeeded");
                Ok(RunOutcome::Succeeded { result })
            }
            Err(error) => {
                tracing::info!(execution_id = %execution.id, error = %error, "execution failed");
                Ok(RunOutcome::Failed { error })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
