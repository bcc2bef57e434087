//! Error types surfaced to workflow code.
//!
//! `TaskError` is what a step, arm, or predicate function returns. `DurableError`
//! is what the durable primitives return to the workflow function; it carries
//! the recorded failure taxonomy plus `Suspended`, which every workflow must
//! propagate unchanged so the engine can hand control back to its host.

use durably_types::error::RepositoryError;
use durably_types::execution::{FailureKind, FailureRecord};

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// Failure of a user-supplied unit of work.
///
/// `status` carries the status code of a failed outbound command so retry
/// policies can tell transient failures from permanent ones.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub status: Option<u16>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// A failure tagged with the status code that caused it.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<RepositoryError> for TaskError {
    fn from(e: RepositoryError) -> Self {
        TaskError::new(e.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::new(format!("serialization error: {e}"))
    }
}

// ---------------------------------------------------------------------------
// DurableError
// ---------------------------------------------------------------------------

/// Errors returned by the durable primitives.
#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    /// A step's function failed and retries are exhausted or disabled.
    #[error("step '{name}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        name: String,
        message: String,
        status_code: Option<u16>,
        attempts: u32,
    },

    /// An external party reported failure for a callback.
    #[error("callback '{name}' failed: {message}")]
    CallbackFailed { name: String, message: String },

    /// A callback deadline elapsed with no report.
    #[error("callback '{name}' timed out")]
    CallbackTimeout { name: String },

    /// A condition poller gave up while its predicate was still false.
    #[error("condition '{name}' exhausted: {message}")]
    ConditionExhausted { name: String, message: String },

    /// One or more parallel branches failed.
    #[error("parallel '{name}' failed: {message}")]
    BranchFailed { name: String, message: String },

    /// Error raised directly by workflow code.
    #[error("{0}")]
    Workflow(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The execution cannot proceed until an external event or wake-up.
    #[error("execution suspended")]
    Suspended,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DurableError {
    /// Shorthand for a workflow-level failure.
    pub fn workflow(message: impl Into<String>) -> Self {
        DurableError::Workflow(message.into())
    }

    /// True when the error only signals suspension.
    ///
    /// Workflow code that catches errors must re-raise these untouched.
    pub fn is_suspended(&self) -> bool {
        matches!(self, DurableError::Suspended)
    }

    /// True when the invocation stops without a workflow outcome: suspension,
    /// or a storage failure that leaves the execution running.
    ///
    /// Compensation logic in a catch block must not run for these.
    pub fn interrupts_invocation(&self) -> bool {
        matches!(self, DurableError::Suspended | DurableError::Repository(_))
    }

    /// Rebuild the error recorded in a failed checkpoint.
    pub fn from_failure(name: &str, failure: &FailureRecord, attempts: u32) -> Self {
        let name = name.to_string();
        let message = failure.message.clone();
        match failure.kind {
            FailureKind::Step => DurableError::StepFailed {
                name,
                message,
                status_code: failure.status_code,
                attempts,
            },
            FailureKind::Callback => DurableError::CallbackFailed { name, message },
            FailureKind::CallbackTimeout => DurableError::CallbackTimeout { name },
            FailureKind::ConditionExhausted => DurableError::ConditionExhausted { name, message },
            FailureKind::Branch => DurableError::BranchFailed { name, message },
            FailureKind::Workflow => DurableError::Workflow(message),
        }
    }

    /// Describe this error as a record that can be checkpointed.
    pub fn to_failure(&self) -> FailureRecord {
        match self {
            DurableError::StepFailed {
                message, status_code, ..
            } => FailureRecord::new(FailureKind::Step, message.clone()).with_status(*status_code),
            DurableError::CallbackFailed { message, .. } => {
                FailureRecord::new(FailureKind::Callback, message.clone())
            }
            DurableError::CallbackTimeout { .. } => {
                FailureRecord::new(FailureKind::CallbackTimeout, self.to_string())
            }
            DurableError::ConditionExhausted { message, .. } => {
                FailureRecord::new(FailureKind::ConditionExhausted, message.clone())
            }
            DurableError::BranchFailed { message, .. } => {
                FailureRecord::new(FailureKind::Branch, message.clone())
            }
            other => FailureRecord::new(FailureKind::Workflow, other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_record_rebuilds_same_error() {
        let original = DurableError::StepFailed {
            name: "create process".to_string(),
            message: "boom".to_string(),
            status_code: Some(503),
            attempts: 3,
        };
        let rebuilt = DurableError::from_failure("create process", &original.to_failure(), 3);
        assert_eq!(rebuilt.to_string(), original.to_string());
        assert!(matches!(
            rebuilt,
            DurableError::StepFailed { status_code: Some(503), attempts: 3, .. }
        ));
    }

    #[test]
    fn timeout_round_trips_through_record() {
        let err = DurableError::CallbackTimeout {
            name: "ask for approval".to_string(),
        };
        let record = err.to_failure();
        assert_eq!(record.kind, FailureKind::CallbackTimeout);
        let rebuilt = DurableError::from_failure("ask for approval", &record, 1);
        assert!(matches!(rebuilt, DurableError::CallbackTimeout { .. }));
    }

    #[test]
    fn only_suspended_is_suspended() {
        assert!(DurableError::Suspended.is_suspended());
        assert!(!DurableError::workflow("x").is_suspended());
    }

    #[test]
    fn storage_failures_interrupt_without_outcome() {
        assert!(DurableError::Suspended.interrupts_invocation());
        assert!(DurableError::Repository(RepositoryError::Connection).interrupts_invocation());
        assert!(!DurableError::workflow("x").interrupts_invocation());
        assert!(!DurableError::Repository(RepositoryError::Connection).is_suspended());
    }

    #[test]
    fn task_error_status() {
        let err = TaskError::status(429, "too many requests");
        assert_eq!(err.status, Some(429));
        assert_eq!(err.to_string(), "too many requests");
        assert_eq!(TaskError::new("x").with_status(500).status, Some(500));
    }
}
