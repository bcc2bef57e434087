//! Step executor: a named, checkpointed unit of work with optional retries.

use std::future::Future;

use durably_types::execution::{Checkpoint, CheckpointKind, FailureKind, FailureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::context::{DurableContext, not_yet_due, replay};
use super::error::{DurableError, TaskError};
use super::retry::{RetryDecision, RetryPolicy};

impl DurableContext {
    /// Run `f` once and checkpoint its result under `name`. Never retries.
    pub async fn step<T, F, Fut>(&self, name: &str, f: F) -> Result<T, DurableError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, TaskError>> + Send,
    {
        self.step_with(name, RetryPolicy::none(), f).await
    }

    /// Run `f` under `retry` and checkpoint the final outcome under `name`.
    ///
    /// On replay the recorded result (or failure) is returned without calling
    /// `f`. A retry with a non-zero delay suspends the execution; the attempt
    /// counter lives in the pending wait until the outcome is checkpointed.
    pub async fn step_with<T, F, Fut>(
        &self,
        name: &str,
        retry: RetryPolicy,
        mut f: F,
    ) -> Result<T, DurableError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, TaskError>> + Send,
    {
        let name = self.qualify(name);
        if let Some(checkpoint) = self.checkpoint(&name) {
            tracing::debug!(execution_id = %self.execution_id(), name = %name, "replaying step");
            return replay(&checkpoint);
        }

        let mut attempt = match self.pending_wait(&name) {
            Some(wait) if not_yet_due(&wait, self.now()) => return Err(DurableError::Suspended),
            Some(wait) => wait.attempt + 1,
            None => 1,
        };

        loop {
            match f().await {
                Ok(value) => {
                    let result = serde_json::to_value(&value)?;
                    let checkpoint = Checkpoint::succeeded(
                        self.execution_id(),
                        &name,
                        CheckpointKind::Step,
                        result,
                        attempt,
                        self.now(),
                    );
                    return replay(&self.record(checkpoint).await?);
                }
                Err(error) => match retry.decide(&error, attempt) {
                    RetryDecision::Retry { delay } if delay.is_zero() => {
                        tracing::debug!(
                            execution_id = %self.execution_id(),
                            name = %name,
                            attempt,
                            error = %error,
                            "step failed, retrying"
                        );
                        attempt += 1;
                    }
                    RetryDecision::Retry { delay } => {
                        return self.suspend(self.retry_wait(&name, attempt, delay, None)).await;
                    }
                    RetryDecision::Stop => {
                        let failure =
                            FailureRecord::new(FailureKind::Step, error.message).with_status(error.status);
                        let checkpoint = Checkpoint::failed(
                            self.execution_id(),
                            &name,
                            CheckpointKind::Step,
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use durably_types::execution::WaitKind;

    use super::*;
    use crate::workflow::testing::Harness;

    #[tokio::test]
    async fn replayed_step_does_not_rerun() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let ctx = h.context(id).await;
            let calls = Arc::clone(&calls);
            let value: String = ctx
                .step("create", move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("p-1".to_string())
                    }
                })
                .await
                .unwrap();
            assert_eq!(value, "p-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_policy_fails_immediately_and_replays_failure() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));

        let run = |ctx: DurableContext, calls: Arc<AtomicU32>| async move {
            ctx.step("explode", move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TaskError::status(500, "boom"))
                }
            })
            .await
        };

        let err = run(h.context(id).await, Arc::clone(&calls)).await.unwrap_err();
        assert!(matches!(
            err,
            DurableError::StepFailed { attempts: 1, status_code: Some(500), .. }
        ));

        let err = run(h.context(id).await, Arc::clone(&calls)).await.unwrap_err();
        assert!(matches!(err, DurableError::StepFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inline_retry_records_attempt_count() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = h.context(id).await;

        let counter = Arc::clone(&calls);
        let value: u32 = ctx
            .step_with("flaky", RetryPolicy::fixed(2, Duration::ZERO), move || {
                let calls = Arc::clone(&counter);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TaskError::new("first attempt fails"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        let log = h.repo.list_checkpoints(&id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].attempts, 2);
    }

    #[tokio::test]
    async fn delayed_retry_suspends_and_survives_replay() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));

        let run = |ctx: DurableContext, calls: Arc<AtomicU32>, policy: RetryPolicy| async move {
            ctx.step_with("flaky", policy, move || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TaskError::new("not yet"))
                    } else {
                        Ok("done".to_string())
                    }
                }
            })
            .await
        };

        let err = run(h.context(id).await, Arc::clone(&calls), policy.clone())
            .await
            .unwrap_err();
        assert!(err.is_suspended());
        let waits = h.repo.list_pending_waits(&id).await.unwrap();
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].kind, WaitKind::Retry);
        assert_eq!(waits[0].attempt, 1);
        assert_eq!(h.scheduler.requests().len(), 1);

        // Woken too early: nothing runs.
        let err = run(h.context(id).await, Arc::clone(&calls), policy.clone())
            .await
            .unwrap_err();
        assert!(err.is_suspended());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        h.clock.advance(Duration::from_secs(30));
        let err = run(h.context(id).await, Arc::clone(&calls), policy.clone())
            .await
            .unwrap_err();
        assert!(err.is_suspended());
        assert_eq!(h.repo.list_pending_waits(&id).await.unwrap()[0].attempt, 2);

        h.clock.advance(Duration::from_secs(30));
        let value = run(h.context(id).await, Arc::clone(&calls), policy).await.unwrap();
        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let log = h.repo.list_checkpoints(&id).await.unwrap();
        assert_eq!(log[0].attempts, 3);
        assert!(h.repo.list_pending_waits(&id).await.unwrap().is_empty());
    }
}
