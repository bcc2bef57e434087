//! Parallel coordinator: run independent branches and aggregate their outcomes.
//!
//! Branch `i` of `parallel("x", ..)` runs on a child context whose names are
//! prefixed `x/i/`. Its terminal outcome is checkpointed as `x/i`, and once
//! every branch is terminal the aggregate is checkpointed as `x`. A branch
//! that suspends keeps the whole coordinator suspended; resolved branches are
//! not re-run on the next invocation.

use std::future::Future;

use durably_types::execution::{Checkpoint, CheckpointKind, CheckpointOutcome};
use futures_util::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{DurableContext, replay};
use super::error::DurableError;

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

type BranchFn = Box<dyn FnOnce(DurableContext) -> BoxFuture<'static, Result<Value, DurableError>> + Send>;

/// One independent sub-flow of a parallel block.
pub struct Branch(BranchFn);

impl Branch {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(DurableContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, DurableError>> + Send + 'static,
    {
        Self(Box::new(move |ctx| Box::pin(f(ctx))))
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    Succeeded,
    Failed,
}

/// Terminal outcome of one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    pub index: usize,
    pub status: BranchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchResult {
    fn from_checkpoint(index: usize, checkpoint: &Checkpoint) -> Self {
        match &checkpoint.outcome {
            CheckpointOutcome::Succeeded { result } => Self {
                index,
                status: BranchStatus::Succeeded,
                result: Some(result.clone()),
                error: None,
            },
            CheckpointOutcome::Failed { failure } => Self {
                index,
                status: BranchStatus::Failed,
                result: None,
                error: Some(failure.message.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionReason {
    AllCompleted,
    SomeFailed,
}

/// Aggregate outcome of a parallel block, decided once every branch is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Per-branch outcomes in branch order.
    pub all: Vec<BranchResult>,
    pub completion_reason: CompletionReason,
}

impl BatchResult {
    pub fn new(mut all: Vec<BranchResult>) -> Self {
        all.sort_by_key(|r| r.index);
        let completion_reason = if all.iter().any(|r| r.status == BranchStatus::Failed) {
            CompletionReason::SomeFailed
        } else {
            CompletionReason::AllCompleted
        };
        Self {
            all,
            completion_reason,
        }
    }

    /// The branches that failed.
    pub fn failed(&self) -> Vec<&BranchResult> {
        self.all
            .iter()
            .filter(|r| r.status == BranchStatus::Failed)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&BranchResult> {
        self.all
            .iter()
            .filter(|r| r.status == BranchStatus::Succeeded)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

impl DurableContext {
    /// Run `branches` concurrently and wait until all of them are terminal.
    ///
    /// Branch failures do not fail the block; they show up in the result.
    pub async fn parallel(&self, name: &str, branches: Vec<Branch>) -> Result<BatchResult, DurableError> {
        let name = self.qualify(name);
        if let Some(checkpoint) = self.checkpoint(&name) {
            tracing::debug!(execution_id = %self.execution_id(), name = %name, "replaying parallel");
            return replay(&checkpoint);
        }

        let runs = branches.into_iter().enumerate().map(|(index, branch)| {
            let branch_name = format!("{name}/{index}");
            let ctx = self.child(format!("{branch_name}/"));
            async move {
                if let Some(checkpoint) = ctx.checkpoint(&branch_name) {
                    return Ok(Some(BranchResult::from_checkpoint(index, &checkpoint)));
                }
                let outcome = (branch.0)(ctx.clone()).await;
                let checkpoint = match outcome {
                    Ok(value) => Checkpoint::succeeded(
                        ctx.execution_id(),
                        &branch_name,
                        CheckpointKind::Parallel,
                        value,
                        1,
                        ctx.now(),
                    ),
                    Err(DurableError::Suspended) => return Ok(None),
                    Err(DurableError::Repository(e)) => return Err(DurableError::Repository(e)),
                    Err(e) => {
                        tracing::debug!(
                            execution_id = %ctx.execution_id(),
                            name = %branch_name,
                            error = %e,
                            "parallel branch failed"
                        );
                        let mut failure = e.to_failure();
                        failure.message = e.to_string();
                        Checkpoint::failed(
                            ctx.execution_id(),
                            &branch_name,
                            CheckpointKind::Parallel,
                            failure,
                            1,
                            ctx.now(),
                        )
                    }
                };
                let stored = ctx.record(checkpoint).await?;
                Ok(Some(BranchResult::from_checkpoint(index, &stored)))
            }
        });

        let mut resolved = Vec::new();
        let mut pending = 0usize;
        for outcome in join_all(runs).await {
            match outcome? {
                Some(result) => resolved.push(result),
                None => pending += 1,
            }
        }

        if pending > 0 {
            tracing::debug!(
                execution_id = %self.execution_id(),
                name = %name,
                pending,
                resolved = resolved.len(),
                "parallel waiting on branches"
            );
            return Err(DurableError::Suspended);
        }

        let batch = BatchResult::new(resolved);
        let checkpoint = Checkpoint::succeeded(
            self.execution_id(),
            &name,
            CheckpointKind::Parallel,
            serde_json::to_value(&batch)?,
            1,
            self.now(),
        );
        replay(&self.record(checkpoint).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
