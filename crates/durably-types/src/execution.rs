//! Execution domain types for durably.
//!
//! An `Execution` is one run of a workflow function. Its progress is recorded
//! as an append-only log of named `Checkpoint`s; open suspension points are
//! tracked as `PendingWait`s until the awaited event arrives.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionId
// ---------------------------------------------------------------------------

/// Opaque unique identifier for an execution, wrapping a UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new ExecutionId using UUID v7 (time-sortable).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create an ExecutionId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One instance of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    /// Name of the workflow function driving this execution.
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Input payload handed to the workflow function on every invocation.
    pub input: serde_json::Value,
    /// Value returned by the workflow function (set on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Description of the error that failed the execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Build a fresh `Running` execution record.
    pub fn new(workflow_name: impl Into<String>, input: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Running,
            input,
            result: None,
            error: None,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle status of an execution.
///
/// Transitions only `Running -> Succeeded` or `Running -> Failed`, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// A persisted, immutable record of one completed unit of work.
///
/// The `name` is unique within its execution and is the replay key: once a
/// checkpoint exists, replay returns its outcome instead of re-running the work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub execution_id: ExecutionId,
    pub name: String,
    pub kind: CheckpointKind,
    pub outcome: CheckpointOutcome,
    /// Number of attempts it took to reach the outcome (1 for a first-try success).
    pub attempts: u32,
    /// Position in the execution's log, assigned by the store on append.
    #[serde(default)]
    pub seq: i64,
    pub recorded_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn succeeded(
        execution_id: ExecutionId,
        name: impl Into<String>,
        kind: CheckpointKind,
        result: serde_json::Value,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            name: name.into(),
            kind,
            outcome: CheckpointOutcome::Succeeded { result },
            attempts,
            seq: 0,
            recorded_at: now,
        }
    }

    pub fn failed(
        execution_id: ExecutionId,
        name: impl Into<String>,
        kind: CheckpointKind,
        failure: FailureRecord,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            name: name.into(),
            kind,
            outcome: CheckpointOutcome::Failed { failure },
            attempts,
            seq: 0,
            recorded_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CheckpointOutcome::Succeeded { .. })
    }
}

/// The kind of durable operation a checkpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Step,
    Callback,
    Condition,
    Parallel,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Step => "step",
            CheckpointKind::Callback => "callback",
            CheckpointKind::Condition => "condition",
            CheckpointKind::Parallel => "parallel",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "step" => Ok(CheckpointKind::Step),
            "callback" => Ok(CheckpointKind::Callback),
            "condition" => Ok(CheckpointKind::Condition),
            "parallel" => Ok(CheckpointKind::Parallel),
            other => Err(format!("invalid checkpoint kind: '{other}'")),
        }
    }
}

/// Recorded result of a checkpointed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckpointOutcome {
    Succeeded { result: serde_json::Value },
    Failed { failure: FailureRecord },
}

/// Serializable description of a failure, enough to rebuild the error on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    /// Status code reported by the failing command, if it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }
}

/// Error taxonomy for recorded failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A step's function failed and retries are exhausted or disabled.
    Step,
    /// An external party reported failure for a callback.
    Callback,
    /// A callback deadline elapsed with no report.
    CallbackTimeout,
    /// A condition poller gave up while its predicate was still false.
    ConditionExhausted,
    /// A parallel branch reached a failed terminal state.
    Branch,
    /// Uncaught error from the workflow function itself.
    Workflow,
}

// ---------------------------------------------------------------------------
// Pending waits
// ---------------------------------------------------------------------------

/// The open suspension state of one durable operation.
///
/// Created when the workflow reaches a suspension point that has no checkpoint
/// yet; deleted once the checkpoint is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWait {
    pub execution_id: ExecutionId,
    /// Checkpoint name this wait will resolve.
    pub name: String,
    pub kind: WaitKind,
    /// Token handed to the external party (callback waits only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_token: Option<String>,
    /// Hard deadline after which the wait resolves as timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Earliest time the execution should be re-invoked for this wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// Attempts consumed so far (retries, poll evaluations).
    pub attempt: u32,
    /// Poller state carried between evaluations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PendingWait {
    /// Time at which the host should next wake the execution for this wait.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        match (self.wake_at, self.deadline) {
            (Some(w), Some(d)) => Some(w.min(d)),
            (w, d) => w.or(d),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_wake().is_some_and(|t| t <= now)
    }
}

/// What a pending wait is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Armed callback waiting for an external report or its deadline.
    Callback,
    /// Condition poller waiting for its next evaluation.
    Condition,
    /// Step or callback arm function waiting out a retry delay.
    Retry,
}

impl WaitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitKind::Callback => "callback",
            WaitKind::Condition => "condition",
            WaitKind::Retry => "retry",
        }
    }
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "callback" => Ok(WaitKind::Callback),
            "condition" => Ok(WaitKind::Condition),
            "retry" => Ok(WaitKind::Retry),
            other => Err(format!("invalid wait kind: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
