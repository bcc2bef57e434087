//! Wake-up worker for `durably serve`.
//!
//! Wake requests from the engine's `ChannelWakeScheduler` are slept on and
//! delivered in-process. A periodic sweep of due waits recovers wake-ups that
//! were lost when a previous process exited before firing them.

use std::time::Duration;

use durably_core::workflow::{ExecutionEvent, WakeRequest};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Spawn the worker. It stops when `cancel` fires.
pub fn spawn_wake_worker(
    state: AppState,
    mut requests: UnboundedReceiver<WakeRequest>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let sweep_every = state.config.wake_poll_interval().max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(sweep_every);
        tracing::info!(sweep_secs = sweep_every.as_secs(), "wake-up worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(request) = requests.recv() => {
                    tokio::spawn(fire_at(state.clone(), request, cancel.clone()));
                }
                _ = sweep.tick() => sweep_due(&state).await,
            }
        }

        tracing::info!("wake-up worker stopped");
    })
}

/// Sleep until the requested time, then re-invoke the execution.
async fn fire_at(state: AppState, request: WakeRequest, cancel: CancellationToken) {
    let delay = (request.at - state.engine.clock().now())
        .to_std()
        .unwrap_or(Duration::ZERO);

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    match state
        .engine
        .run(state.workflow.as_ref(), &request.execution_id, Some(ExecutionEvent::Wake))
        .await
    {
        Ok(outcome) => tracing::debug!(
            execution_id = %request.execution_id,
            outcome = outcome.label(),
            "scheduled wake-up delivered"
        ),
        Err(e) => tracing::warn!(
            execution_id = %request.execution_id,
            error = %e,
            "scheduled wake-up failed"
        ),
    }
}

async fn sweep_due(state: &AppState) {
    match state.engine.wake_due(state.workflow.as_ref()).await {
        Ok(woken) if woken.is_empty() => {}
        Ok(woken) => tracing::debug!(count = woken.len(), "swept due executions"),
        Err(e) => tracing::warn!(error = %e, "wake-up sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use durably_core::workflow::{ChannelWakeScheduler, RunOutcome};
    use durably_types::config::GlobalConfig;
    use durably_types::execution::ExecutionStatus;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn worker_delivers_due_wakeups_and_stops() {
        let (scheduler, requests) = ChannelWakeScheduler::new();
        let state = AppState::for_tests(Arc::new(scheduler)).await;
        let (id, outcome) = state
            .engine
            .start(state.workflow.as_ref(), json!({}))
            .await
            .unwrap();
        assert!(outcome.is_suspended());

        let cancel = CancellationToken::new();
        let handle = spawn_wake_worker(state.clone(), requests, cancel.clone());

        // A wake-up for a suspended execution that is not yet due re-runs it
        // without changing its state.
        fire_at(
            state.clone(),
            WakeRequest {
                execution_id: id,
                at: state.engine.clock().now(),
            },
            cancel.clone(),
        )
        .await;
        let execution = state
            .engine
            .repository()
            .get_execution(&id)
            .await
            .unwrap()
            .unwrap();
        assert!(!execution.is_closed());

        cancel.cancel();
        handle.await.unwrap();

        let outcome = state
            .engine
            .run(state.workflow.as_ref(), &id, None)
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Suspended { .. }));
    }

    #[tokio::test]
    async fn worker_times_out_unanswered_approval() {
        let config = GlobalConfig {
            approval_timeout_secs: 1,
            wake_poll_interval_secs: 1,
            ..GlobalConfig::default()
        };
        let (scheduler, requests) = ChannelWakeScheduler::new();
        let state = AppState::for_tests_with(config, Arc::new(scheduler)).await;

        let cancel = CancellationToken::new();
        let handle = spawn_wake_worker(state.clone(), requests, cancel.clone());

        let (id, outcome) = state
            .engine
            .start(state.workflow.as_ref(), json!({}))
            .await
            .unwrap();
        assert!(outcome.is_suspended());

        // Nobody answers; the deadline wake-up or the sweep closes it.
        let execution = tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                let execution = state
                    .engine
                    .repository()
                    .get_execution(&id)
                    .await
                    .unwrap()
                    .unwrap();
                if execution.is_closed() {
                    return execution;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("worker never closed the execution");

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.as_deref().unwrap_or_default().contains("timed out"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
