//! Callback waiter: suspend until an external party reports back.
//!
//! States: armed (arm function hands the token out, with step retry
//! semantics) -> waiting (pending wait with a deadline) -> resolved by a
//! success report, a failure report, or the deadline.
//!
//! Reports are applied by the engine before replay, so by the time the
//! waiter runs again a resolved callback already has its checkpoint.

use std::future::Future;
use std::time::Duration;

use durably_types::execution::{
    Checkpoint, CheckpointKind, FailureKind, FailureRecord, PendingWait, WaitKind,
};

use super::clock::add_delay;
use super::context::{DurableContext, new_callback_token, not_yet_due, replay};
use super::error::{DurableError, TaskError};
use super::retry::{RetryDecision, RetryPolicy};

/// Options for [`DurableContext::wait_for_callback`].
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// How long to wait for a report once armed.
    pub timeout: Duration,
    /// Policy applied to failures of the arm function.
    pub retry: RetryPolicy,
}

impl CallbackConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl DurableContext {
    /// Hand a callback token to `arm` and wait for the report.
    ///
    /// Returns the payload of a success report. A failure report surfaces as
    /// `CallbackFailed` and an elapsed deadline as `CallbackTimeout`.
    pub async fn wait_for_callback<F, Fut>(
        &self,
        name: &str,
        mut arm: F,
        config: CallbackConfig,
    ) -> Result<serde_json::Value, DurableError>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = Result<(), TaskError>> + Send,
    {
        let name = self.qualify(name);
        if let Some(checkpoint) = self.checkpoint(&name) {
            tracing::debug!(execution_id = %self.execution_id(), name = %name, "replaying callback");
            return replay(&checkpoint);
        }

        let now = self.now();
        let (mut attempt, token) = match self.pending_wait(&name) {
            Some(wait) if wait.kind == WaitKind::Callback => {
                if wait.deadline.is_some_and(|d| d <= now) {
                    tracing::debug!(
                        execution_id = %self.execution_id(),
                        name = %name,
                        "callback deadline passed"
                    );
                    let failure = FailureRecord::new(
                        FailureKind::CallbackTimeout,
                        format!("no report before {}", now.to_rfc3339()),
                    );
                    let checkpoint = Checkpoint::failed(
                        self.execution_id(),
                        &name,
                        CheckpointKind::Callback,
                        failure,
                        wait.attempt,
                        now,
                    );
                    return replay(&self.record(checkpoint).await?);
                }
                return Err(DurableError::Suspended);
            }
            Some(wait) if not_yet_due(&wait, now) => return Err(DurableError::Suspended),
            Some(wait) => (
                wait.attempt + 1,
                wait.callback_token.unwrap_or_else(new_callback_token),
            ),
            None => (1, new_callback_token()),
        };

        loop {
            match arm(token.clone()).await {
                Ok(()) => {
                    let now = self.now();
                    let wait = PendingWait {
                        execution_id: self.execution_id(),
                        name: name.clone(),
                        kind: WaitKind::Callback,
                        callback_token: Some(token),
                        deadline: Some(add_delay(now, config.timeout)),
                        wake_at: None,
                        attempt,
                        state: None,
                        created_at: now,
                    };
                    return self.suspend(wait).await;
                }
                Err(error) => match config.retry.decide(&error, attempt) {
                    RetryDecision::Retry { delay } if delay.is_zero() => {
                        tracing::debug!(
                            execution_id = %self.execution_id(),
                            name = %name,
                            attempt,
                            error = %error,
                            "arming callback failed, retrying"
                        );
                        attempt += 1;
                    }
                    RetryDecision::Retry { delay } => {
                        let wait = self.retry_wait(&name, attempt, delay, Some(token));
                        return self.suspend(wait).await;
                    }
                    RetryDecision::Stop => {
                        let failure =
                            FailureRecord::new(FailureKind::Step, error.message).with_status(error.status);
                        let checkpoint = Checkpoint::failed(
                            self.execution_id(),
                            &name,
                            CheckpointKind::Callback,
                            failure,
                            attempt,
                            self.now(),
                        );
                        return replay(&self.record(checkpoint).await?);
                    }
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
