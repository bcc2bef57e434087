//! Condition poller: re-evaluate a check with backoff until told to stop.
//!
//! Intermediate evaluations are not checkpointed. The latest state and the
//! attempt counter ride along in the `Condition` pending wait; only the
//! terminating evaluation writes a checkpoint.

use std::future::Future;
use std::time::Duration;

use durably_types::execution::{
    Checkpoint, CheckpointKind, FailureKind, FailureRecord, PendingWait, WaitKind,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::clock::add_delay;
use super::context::{DurableContext, not_yet_due, replay};
use super::error::{DurableError, TaskError};

/// What the wait strategy wants after an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitDecision {
    pub should_continue: bool,
    pub delay: Duration,
}

impl WaitDecision {
    /// Evaluate again after `delay`.
    pub fn continue_after(delay: Duration) -> Self {
        Self {
            should_continue: true,
            delay,
        }
    }

    /// Stop polling; the current state is final.
    pub fn stop() -> Self {
        Self {
            should_continue: false,
            delay: Duration::ZERO,
        }
    }
}

type WaitStrategy<S> = Box<dyn Fn(&S, u32) -> WaitDecision + Send + Sync>;

/// Options for [`DurableContext::wait_for_condition`].
pub struct ConditionConfig<S> {
    pub initial_state: S,
    /// Called with the freshly evaluated state and the 1-based attempt number.
    pub wait_strategy: WaitStrategy<S>,
}

impl<S> ConditionConfig<S> {
    pub fn new<F>(initial_state: S, wait_strategy: F) -> Self
    where
        F: Fn(&S, u32) -> WaitDecision + Send + Sync + 'static,
    {
        Self {
            initial_state,
            wait_strategy: Box::new(wait_strategy),
        }
    }
}

impl DurableContext {
    /// Poll `check` until the wait strategy stops, returning the final state.
    ///
    /// `check` receives the previous state and returns the new one. An error
    /// from `check` fails the poller like a step failure, with no retry.
    pub async fn wait_for_condition<S, F, Fut>(
        &self,
        name: &str,
        mut check: F,
        config: ConditionConfig<S>,
    ) -> Result<S, DurableError>
    where
        S: Serialize + DeserializeOwned + Send,
        F: FnMut(S) -> Fut + Send,
        Fut: Future<Output = Result<S, TaskError>> + Send,
    {
        let name = self.qualify(name);
        if let Some(checkpoint) = self.checkpoint(&name) {
            tracing::debug!(execution_id = %self.execution_id(), name = %name, "replaying condition");
            return replay(&checkpoint);
        }

        let ConditionConfig {
            initial_state,
            wait_strategy,
        } = config;

        let (mut attempt, mut state) = match self.pending_wait(&name) {
            Some(wait) if not_yet_due(&wait, self.now()) => return Err(DurableError::Suspended),
            Some(wait) => {
                let state = match wait.state {
                    Some(value) => serde_json::from_value(value)?,
                    None => initial_state,
                };
                (wait.attempt + 1, state)
            }
            None => (1, initial_state),
        };

        loop {
            let next = match check(state).await {
                Ok(next) => next,
                Err(error) => {
                    let failure =
                        FailureRecord::new(FailureKind::Step, error.message).with_status(error.status);
                    let checkpoint = Checkpoint::failed(
                        self.execution_id(),
                        &name,
                        CheckpointKind::Condition,
                        failure,
                        attempt,
                        self.now(),
                    );
                    return replay(&self.record(checkpoint).await?);
                }
            };

            let decision = wait_strategy(&next, attempt);
            if !decision.should_continue {
                let checkpoint = Checkpoint::succeeded(
                    self.execution_id(),
                    &name,
                    CheckpointKind::Condition,
                    serde_json::to_value(&next)?,
                    attempt,
                    self.now(),
                );
                return replay(&self.record(checkpoint).await?);
            }

            tracing::debug!(
                execution_id = %self.execution_id(),
                name = %name,
                attempt,
                delay_secs = decision.delay.as_secs(),
                "condition not met"
            );

            if decision.delay.is_zero() {
                attempt += 1;
                state = next;
                continue;
            }

            let now = self.now();
            let wait = PendingWait {
                execution_id: self.execution_id(),
                name: name.clone(),
                kind: WaitKind::Condition,
                callback_token: None,
                deadline: None,
                wake_at: Some(add_delay(now, decision.delay)),
                attempt,
                state: Some(serde_json::to_value(&next)?),
                created_at: now,
            };
            return self.suspend(wait).await;
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

    use super::*;
    use crate::workflow::testing::Harness;

    /// Mirrors the approval workflow: poll while false, at most `max` times.
    fn strategy(max: u32, delay: Duration) -> ConditionConfig<bool> {
        ConditionConfig::new(false, move |state: &bool, attempt| {
            if !*state && attempt <= max {
                WaitDecision::continue_after(delay)
            } else {
                WaitDecision::stop()
            }
        })
    }

    fn check_after(calls: Arc<AtomicU32>, true_from: u32) -> impl FnMut(bool) -> std::future::Ready<Result<bool, TaskError>> + Send {
        move |_previous| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(n >= true_from))
        }
    }

    #[tokio::test]
    async fn satisfied_on_first_evaluation() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));

        let done = h
            .context(id)
            .await
            .wait_for_condition("idle", check_after(Arc::clone(&calls), 1), strategy(10, Duration::from_secs(600)))
            .await
            .unwrap();
        assert!(done);

        let again = h
            .context(id)
            .await
            .wait_for_condition("idle", check_after(Arc::clone(&calls), 1), strategy(10, Duration::from_secs(600)))
            .await
            .unwrap();
        assert!(again);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn polls_with_delay_and_keeps_attempts_in_wait() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));
        let delay = Duration::from_secs(600);

        for expected_attempt in 1..=2 {
            let err = h
                .context(id)
                .await
                .wait_for_condition("idle", check_after(Arc::clone(&calls), 3), strategy(10, delay))
                .await
                .unwrap_err();
            assert!(err.is_suspended());
            let wait = h.repo.list_pending_waits(&id).await.unwrap().remove(0);
            assert_eq!(wait.kind, WaitKind::Condition);
            assert_eq!(wait.attempt, expected_attempt);
            assert_eq!(wait.state, Some(serde_json::json!(false)));

            // Early wake-ups do not evaluate.
            let _ = h
                .context(id)
                .await
                .wait_for_condition("idle", check_after(Arc::clone(&calls), 3), strategy(10, delay))
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), expected_attempt);
            h.clock.advance(delay);
        }

        let done = h
            .context(id)
            .await
            .wait_for_condition("idle", check_after(Arc::clone(&calls), 3), strategy(10, delay))
            .await
            .unwrap();
        assert!(done);

        let log = h.repo.list_checkpoints(&id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, CheckpointKind::Condition);
        assert_eq!(log[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_poller_returns_false() {
        let h = Harness::new();
        let id = h.execution().await;
        let calls = Arc::new(AtomicU32::new(0));

        // Zero delay polls inline until the strategy gives up.
        let done = h
            .context(id)
            .await
            .wait_for_condition("idle", check_after(Arc::clone(&calls), u32::MAX), strategy(3, Duration::ZERO))
            .await
            .unwrap();
        assert!(!done);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn check_error_fails_without_further_attempts() {
        let h = Harness::new();
        let id = h.execution().await;

        let err = h
            .context(id)
            .await
            .wait_for_condition(
                "idle",
                |_s: bool| std::future::ready(Err(TaskError::new("lookup failed"))),
                strategy(10, Duration::ZERO),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DurableError::StepFailed { attempts: 1, .. }));
    }
}
