//! The process approval workflow.

use std::sync::Arc;
use std::time::Duration;

use durably_types::config::GlobalConfig;
use durably_types::process::{Process, ProcessStatus};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::repository::idempotency::IdempotencyStore;
use crate::repository::process::ProcessRepository;
use crate::workflow::callback::CallbackConfig;
use crate::workflow::clock::Clock;
use crate::workflow::condition::{ConditionConfig, WaitDecision};
use crate::workflow::context::DurableContext;
use crate::workflow::engine::Workflow;
use crate::workflow::error::{DurableError, TaskError};
use crate::workflow::idempotency::IdempotencyGuard;
use crate::workflow::parallel::Branch;
use crate::workflow::retry::RetryPolicy;

use super::ports::{ApprovalNotifier, CommandDispatcher, CommandError};

/// Name stored on executions of this workflow.
pub const APPROVAL_WORKFLOW: &str = "process-approval";

const CONDITION_NAME: &str = "check for running processes";
const COMMANDS_NAME: &str = "run commands";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for [`ApprovalWorkflow`].
#[derive(Debug, Clone)]
pub struct ApprovalSettings {
    pub approval_timeout: Duration,
    pub command_timeout: Duration,
    pub condition_poll_interval: Duration,
    pub condition_max_attempts: u32,
    pub idempotency_ttl: Duration,
    /// Policy for the process-record steps.
    pub step_retry: RetryPolicy,
    /// Policy for arming command two; only transient statuses are retried.
    pub command_two_retry: RetryPolicy,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

impl ApprovalSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            approval_timeout: config.approval_timeout(),
            command_timeout: config.command_timeout(),
            condition_poll_interval: config.condition_poll_interval(),
            condition_max_attempts: config.condition_max_attempts,
            idempotency_ttl: config.idempotency_ttl(),
            step_retry: RetryPolicy::none(),
            command_two_retry: RetryPolicy::transient_http(
                3,
                Duration::from_secs(5),
                Duration::from_secs(60),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Command {
    One,
    Two,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::One => "command one",
            Command::Two => "command two",
        }
    }

    async fn dispatch<D: CommandDispatcher>(self, dispatcher: &D, token: &str) -> Result<(), CommandError> {
        match self {
            Command::One => dispatcher.command_one(token).await,
            Command::Two => dispatcher.command_two(token).await,
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalWorkflow
// ---------------------------------------------------------------------------

/// Approval-gated process run.
///
/// Dependencies are injected so tests can substitute in-memory stores and
/// recording transports.
pub struct ApprovalWorkflow<P, I, N, D>
where
    I: IdempotencyStore,
{
    processes: Arc<P>,
    guard: Arc<IdempotencyGuard<I>>,
    notifier: Arc<N>,
    dispatcher: Arc<D>,
    clock: Arc<dyn Clock>,
    settings: ApprovalSettings,
}

impl<P, I, N, D> ApprovalWorkflow<P, I, N, D>
where
    P: ProcessRepository + 'static,
    I: IdempotencyStore + 'static,
    N: ApprovalNotifier + 'static,
    D: CommandDispatcher + 'static,
{
    pub fn new(
        processes: Arc<P>,
        markers: Arc<I>,
        notifier: Arc<N>,
        dispatcher: Arc<D>,
        clock: Arc<dyn Clock>,
        settings: ApprovalSettings,
    ) -> Self {
        let guard = IdempotencyGuard::new(markers, Arc::clone(&clock), settings.idempotency_ttl);
        Self {
            processes,
            guard: Arc::new(guard),
            notifier,
            dispatcher,
            clock,
            settings,
        }
    }

    pub fn processes(&self) -> &Arc<P> {
        &self.processes
    }

    async fn create_process(&self, ctx: &DurableContext) -> Result<Uuid, DurableError> {
        let processes = Arc::clone(&self.processes);
        let clock = Arc::clone(&self.clock);
        ctx.step_with("create process", self.settings.step_retry.clone(), move || {
            let processes = Arc::clone(&processes);
            let clock = Arc::clone(&clock);
            async move {
                let process = Process::new(clock.now());
                processes.create_process(&process).await?;
                tracing::info!(process_id = %process.id, "created process");
                Ok(process.id)
            }
        })
        .await
    }

    async fn set_status(
        &self,
        ctx: &DurableContext,
        step: &str,
        process_id: Uuid,
        status: ProcessStatus,
    ) -> Result<(), DurableError> {
        let processes = Arc::clone(&self.processes);
        let clock = Arc::clone(&self.clock);
        ctx.step_with(step, self.settings.step_retry.clone(), move || {
            let processes = Arc::clone(&processes);
            let clock = Arc::clone(&clock);
            async move {
                processes
                    .set_process_status(&process_id, status, clock.now())
                    .await?;
                Ok(())
            }
        })
        .await
    }

    fn command_branch(&self, command: Command, process_id: Uuid) -> Branch {
        let guard = Arc::clone(&self.guard);
        let dispatcher = Arc::clone(&self.dispatcher);
        let retry = match command {
            Command::One => RetryPolicy::none(),
            Command::Two => self.settings.command_two_retry.clone(),
        };
        let config = CallbackConfig::new(self.settings.command_timeout).with_retry(retry);

        Branch::new(move |ctx: DurableContext| async move {
            ctx.wait_for_callback(
                command.name(),
                move |token: String| {
                    let guard = Arc::clone(&guard);
                    let dispatcher = Arc::clone(&dispatcher);
                    async move {
                        let key = process_id.to_string();
                        guard
                            .execute_once(&key, command.name(), || {
                                command.dispatch(dispatcher.as_ref(), &token)
                            })
                            .await?;
                        Ok(())
                    }
                },
                config,
            )
            .await
        })
    }

    /// Everything after the process exists; failures here mark it failed.
    async fn approve_and_run(&self, ctx: &DurableContext, process_id: Uuid) -> Result<Value, DurableError> {
        let notifier = Arc::clone(&self.notifier);
        let approval = ctx
            .wait_for_callback(
                "ask for approval",
                move |token: String| {
                    let notifier = Arc::clone(&notifier);
                    async move { notifier.send_approval(&token).await.map_err(TaskError::from) }
                },
                CallbackConfig::new(self.settings.approval_timeout),
            )
            .await?;

        tracing::info!(process_id = %process_id, approval = %approval, "user approval received");
        if !is_approved(&approval) {
            return Err(DurableError::workflow("No user approval"));
        }

        let processes = Arc::clone(&self.processes);
        let max_attempts = self.settings.condition_max_attempts;
        let poll_interval = self.settings.condition_poll_interval;
        let finished = ctx
            .wait_for_condition(
                CONDITION_NAME,
                move |_previous: bool| {
                    let processes = Arc::clone(&processes);
                    async move {
                        let running = processes.find_by_status(ProcessStatus::InProgress).await?;
                        Ok(running.is_empty())
                    }
                },
                ConditionConfig::new(false, move |finished: &bool, attempt| {
                    if !*finished && attempt <= max_attempts {
                        WaitDecision::continue_after(poll_interval)
                    } else {
                        WaitDecision::stop()
                    }
                }),
            )
            .await?;

        if !finished {
            return Err(DurableError::ConditionExhausted {
                name: CONDITION_NAME.to_string(),
                message: "Processes not finished in a timely manner".to_string(),
            });
        }

        self.set_status(ctx, "start process", process_id, ProcessStatus::InProgress)
            .await?;

        let results = ctx
            .parallel(
                COMMANDS_NAME,
                vec![
                    self.command_branch(Command::One, process_id),
                    self.command_branch(Command::Two, process_id),
                ],
            )
            .await?;
        tracing::info!(
            process_id = %process_id,
            completion_reason = ?results.completion_reason,
            "commands completed"
        );

        let failed = results.failed();
        if !failed.is_empty() {
            let details = failed
                .iter()
                .map(|r| format!("branch {}: {}", r.index, r.error.as_deref().unwrap_or("failed")))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DurableError::BranchFailed {
                name: COMMANDS_NAME.to_string(),
                message: format!("{process_id} failed {details}"),
            });
        }

        self.set_status(ctx, "complete process", process_id, ProcessStatus::Completed)
            .await?;

        Ok(json!({ "processId": process_id, "status": "success" }))
    }
}

impl<P, I, N, D> Workflow for ApprovalWorkflow<P, I, N, D>
where
    P: ProcessRepository + 'static,
    I: IdempotencyStore + 'static,
    N: ApprovalNotifier + 'static,
    D: CommandDispatcher + 'static,
{
    fn name(&self) -> &str {
        APPROVAL_WORKFLOW
    }

    async fn run(&self, ctx: DurableContext, _input: Value) -> Result<Value, DurableError> {
        let process_id = self.create_process(&ctx).await?;

        match self.approve_and_run(&ctx, process_id).await {
            Ok(result) => Ok(result),
            Err(e) if e.interrupts_invocation() => Err(e),
            Err(e) => {
                tracing::error!(process_id = %process_id, error = %e, "process failed");
                self.set_status(&ctx, "fail process", process_id, ProcessStatus::Failed)
                    .await?;
                Err(e)
            }
        }
    }
}

/// An approval payload is either the JSON object or its string encoding.
fn is_approved(payload: &Value) -> bool {
    let parsed = match payload {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    };
    parsed.get("approved").and_then(Value::as_bool).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{DateTime, Utc};
    use durably_types::error::RepositoryError;
    use durably_types::execution::{
        Checkpoint, CheckpointKind, Execution, ExecutionId, ExecutionStatus, PendingWait,
    };

    use super::*;
    use crate::repository::execution::{AppendOutcome, ExecutionRepository};
    use crate::repository::memory::{
        InMemoryExecutionRepository, InMemoryIdempotencyStore, InMemoryProcessRepository,
    };
    use crate::workflow::clock::ManualClock;
    use crate::workflow::engine::{
        CallbackReport, EngineError, ExecutionEngine, ExecutionEvent, RunOutcome,
    };
    use crate::workflow::scheduler::RecordingWakeScheduler;
    use crate::workflow::testing::epoch;

    #[derive(Default)]
    struct RecordingNotifier {
        tokens: Mutex<Vec<String>>,
    }

    impl ApprovalNotifier for RecordingNotifier {
        async fn send_approval(&self, callback_token: &str) -> Result<(), CommandError> {
            self.tokens.lock().unwrap().push(callback_token.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        one: Mutex<Vec<String>>,
        two: Mutex<Vec<String>>,
        /// Statuses returned by the first calls to command two.
        two_failures: Mutex<Vec<u16>>,
    }

    impl CommandDispatcher for RecordingDispatcher {
        async fn command_one(&self, callback_token: &str) -> Result<(), CommandError> {
            self.one.lock().unwrap().push(callback_token.to_string());
            Ok(())
        }

        async fn command_two(&self, callback_token: &str) -> Result<(), CommandError> {
            self.two.lock().unwrap().push(callback_token.to_string());
            let mut failures = self.two_failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(CommandError::Status {
                    status: failures.remove(0),
                })
            }
        }
    }

    /// Process store whose first `create_process` calls fail.
    struct FlakyProcesses {
        inner: InMemoryProcessRepository,
        create_failures: AtomicU32,
    }

    impl ProcessRepository for FlakyProcesses {
        async fn create_process(&self, process: &Process) -> Result<(), RepositoryError> {
            if self
                .create_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RepositoryError::Query("database is locked".to_string()));
            }
            self.inner.create_process(process).await
        }

        async fn set_process_status(
            &self,
            id: &Uuid,
            status: ProcessStatus,
            updated_at: DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            self.inner.set_process_status(id, status, updated_at).await
        }

        async fn get_process(&self, id: &Uuid) -> Result<Option<Process>, RepositoryError> {
            self.inner.get_process(id).await
        }

        async fn find_by_status(&self, status: ProcessStatus) -> Result<Vec<Process>, RepositoryError> {
            self.inner.find_by_status(status).await
        }
    }

    /// Execution store that fails the first append of one checkpoint name.
    struct FailingAppend {
        inner: InMemoryExecutionRepository,
        name: &'static str,
        failures: AtomicU32,
    }

    impl FailingAppend {
        fn new(name: &'static str) -> Self {
            Self {
                inner: InMemoryExecutionRepository::new(),
                name,
                failures: AtomicU32::new(1),
            }
        }
    }

    impl ExecutionRepository for FailingAppend {
        async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
            self.inner.create_execution(execution).await
        }

        async fn get_execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
            self.inner.get_execution(id).await
        }

        async fn list_executions(
            &self,
            status: Option<ExecutionStatus>,
            limit: u32,
        ) -> Result<Vec<Execution>, RepositoryError> {
            self.inner.list_executions(status, limit).await
        }

        async fn finish_execution(
            &self,
            id: &ExecutionId,
            status: ExecutionStatus,
            result: Option<&Value>,
            error: Option<&str>,
            completed_at: DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            self.inner
                .finish_execution(id, status, result, error, completed_at)
                .await
        }

        async fn list_checkpoints(&self, id: &ExecutionId) -> Result<Vec<Checkpoint>, RepositoryError> {
            self.inner.list_checkpoints(id).await
        }

        async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, RepositoryError> {
            if checkpoint.name == self.name
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(RepositoryError::Query("disk full".to_string()));
            }
            self.inner.append_checkpoint(checkpoint).await
        }

        async fn upsert_pending_wait(&self, wait: &PendingWait) -> Result<(), RepositoryError> {
            self.inner.upsert_pending_wait(wait).await
        }

        async fn list_pending_waits(&self, id: &ExecutionId) -> Result<Vec<PendingWait>, RepositoryError> {
            self.inner.list_pending_waits(id).await
        }

        async fn find_wait_by_token(&self, token: &str) -> Result<Option<PendingWait>, RepositoryError> {
            self.inner.find_wait_by_token(token).await
        }

        async fn delete_pending_wait(&self, id: &ExecutionId, name: &str) -> Result<(), RepositoryError> {
            self.inner.delete_pending_wait(id, name).await
        }

        async fn list_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<PendingWait>, RepositoryError> {
            self.inner.list_due_waits(now).await
        }
    }

    type TestWorkflow =
        ApprovalWorkflow<FlakyProcesses, InMemoryIdempotencyStore, RecordingNotifier, RecordingDispatcher>;

    struct Fixture {
        engine: ExecutionEngine,
        clock: Arc<ManualClock>,
        workflow: TestWorkflow,
        notifier: Arc<RecordingNotifier>,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn fixture(create_failures: u32, settings: ApprovalSettings) -> Fixture {
        fixture_with_repo(InMemoryExecutionRepository::new(), create_failures, settings)
    }

    fn fixture_with_repo<R: ExecutionRepository + 'static>(
        repo: R,
        create_failures: u32,
        settings: ApprovalSettings,
    ) -> Fixture {
        let clock = Arc::new(ManualClock::new(epoch()));
        let engine = ExecutionEngine::new(repo)
            .with_clock(clock.clone())
            .with_scheduler(Arc::new(RecordingWakeScheduler::new()));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processes = Arc::new(FlakyProcesses {
            inner: InMemoryProcessRepository::new(),
            create_failures: AtomicU32::new(create_failures),
        });
        let workflow = ApprovalWorkflow::new(
            processes,
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::clone(&notifier),
            Arc::clone(&dispatcher),
            clock.clone(),
            settings,
        );
        Fixture {
            engine,
            clock,
            workflow,
            notifier,
            dispatcher,
        }
    }

    impl Fixture {
        async fn approve(&self, payload: Value) -> RunOutcome {
            let token = self.notifier.tokens.lock().unwrap()[0].clone();
            self.engine
                .deliver(&self.workflow, &token, CallbackReport::Success(payload))
                .await
                .unwrap()
                .1
        }

        async fn process_status(&self, id: &ExecutionId) -> ProcessStatus {
            let log = self.engine.repository().list_checkpoints(id).await.unwrap();
            let created = log.iter().find(|c| c.name == "create process").unwrap();
            let process_id: Uuid = match &created.outcome {
                durably_types::execution::CheckpointOutcome::Succeeded { result } => {
                    serde_json::from_value(result.clone()).unwrap()
                }
                other => panic!("process not created: {other:?}"),
            };
            self.workflow
                .processes()
                .get_process(&process_id)
                .await
                .unwrap()
                .unwrap()
                .status
        }
    }

    #[tokio::test]
    async fn approved_run_succeeds() {
        let f = fixture(0, ApprovalSettings::default());

        let (id, outcome) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        assert!(outcome.is_suspended());
        assert_eq!(f.notifier.tokens.lock().unwrap().len(), 1);

        let outcome = f.approve(json!({"approved": true})).await;
        let RunOutcome::Suspended { waits } = outcome else {
            panic!("expected to wait for commands");
        };
        assert_eq!(waits.len(), 2);
        assert_eq!(f.process_status(&id).await, ProcessStatus::InProgress);

        let one = f.dispatcher.one.lock().unwrap()[0].clone();
        let two = f.dispatcher.two.lock().unwrap()[0].clone();

        let (_, outcome) = f
            .engine
            .deliver(&f.workflow, &one, CallbackReport::Success(json!({"success": true})))
            .await
            .unwrap();
        assert!(outcome.is_suspended());

        let (_, outcome) = f
            .engine
            .deliver(&f.workflow, &two, CallbackReport::Success(json!({"success": true})))
            .await
            .unwrap();
        match outcome {
            RunOutcome::Succeeded { result } => assert_eq!(result["status"], "success"),
            other => panic!("unexpected {other:?}"),
        }

        let execution = f.engine.repository().get_execution(&id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(f.process_status(&id).await, ProcessStatus::Completed);
        assert_eq!(f.dispatcher.one.lock().unwrap().len(), 1);
        assert_eq!(f.dispatcher.two.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_approval_fails_without_commands() {
        let f = fixture(0, ApprovalSettings::default());

        let (id, _) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        let token = f.notifier.tokens.lock().unwrap()[0].clone();
        let (_, outcome) = f
            .engine
            .deliver(&f.workflow, &token, CallbackReport::Failure(Some("rejected".into())))
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Failed { ref error } if error.contains("rejected")));
        assert!(f.dispatcher.one.lock().unwrap().is_empty());
        assert!(f.dispatcher.two.lock().unwrap().is_empty());
        assert_eq!(f.process_status(&id).await, ProcessStatus::Failed);

        let log = f.engine.repository().list_checkpoints(&id).await.unwrap();
        assert!(!log.iter().any(|c| c.name.starts_with(COMMANDS_NAME)));
    }

    #[tokio::test]
    async fn unapproved_payload_fails() {
        let f = fixture(0, ApprovalSettings::default());

        let (id, _) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        let outcome = f.approve(json!("{\"approved\":false}")).await;

        assert!(matches!(outcome, RunOutcome::Failed { ref error } if error == "No user approval"));
        assert_eq!(f.process_status(&id).await, ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn busy_system_exhausts_condition() {
        let f = fixture(0, ApprovalSettings::default());
        let blocker = Process {
            status: ProcessStatus::InProgress,
            ..Process::new(epoch())
        };
        f.workflow.processes().create_process(&blocker).await.unwrap();

        let (id, _) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        let mut outcome = f.approve(json!({"approved": true})).await;

        let mut wakes = 0;
        while outcome.is_suspended() {
            assert!(wakes < 20, "condition never gave up");
            f.clock.advance(Duration::from_secs(600));
            outcome = f.engine.wake_due(&f.workflow).await.unwrap().remove(0).1;
            wakes += 1;
        }

        assert_eq!(wakes, 10);
        assert!(matches!(
            outcome,
            RunOutcome::Failed { ref error } if error.contains("Processes not finished in a timely manner")
        ));
        assert_eq!(f.process_status(&id).await, ProcessStatus::Failed);
        assert!(f.dispatcher.one.lock().unwrap().is_empty());

        let log = f.engine.repository().list_checkpoints(&id).await.unwrap();
        let condition = log.iter().find(|c| c.name == CONDITION_NAME).unwrap();
        assert_eq!(condition.kind, CheckpointKind::Condition);
        assert_eq!(condition.attempts, 11);
    }

    #[tokio::test]
    async fn create_step_retry_is_recorded() {
        let settings = ApprovalSettings {
            step_retry: RetryPolicy::fixed(2, Duration::ZERO),
            ..ApprovalSettings::default()
        };
        let f = fixture(1, settings);

        let (id, outcome) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        assert!(outcome.is_suspended());

        let log = f.engine.repository().list_checkpoints(&id).await.unwrap();
        let created = log.iter().find(|c| c.name == "create process").unwrap();
        assert!(created.is_success());
        assert_eq!(created.attempts, 2);

        f.approve(json!({"approved": true})).await;
        let one = f.dispatcher.one.lock().unwrap()[0].clone();
        let two = f.dispatcher.two.lock().unwrap()[0].clone();
        f.engine
            .deliver(&f.workflow, &one, CallbackReport::Success(json!({"success": true})))
            .await
            .unwrap();
        let (_, outcome) = f
            .engine
            .deliver(&f.workflow, &two, CallbackReport::Success(json!({"success": true})))
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn create_failure_without_retry_fails_execution() {
        let f = fixture(1, ApprovalSettings::default());

        let (_, outcome) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { ref error } if error.contains("database is locked")));
        assert!(f.notifier.tokens.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_two_retries_transient_status() {
        let f = fixture(0, ApprovalSettings::default());
        f.dispatcher.two_failures.lock().unwrap().push(503);

        let (id, _) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        f.approve(json!({"approved": true})).await;

        // Command two is waiting out its backoff; command one is armed.
        let waits = f.engine.repository().list_pending_waits(&id).await.unwrap();
        let retry = waits.iter().find(|w| w.name == "run commands/1/command two").unwrap();
        assert_eq!(retry.kind, durably_types::execution::WaitKind::Retry);

        f.clock.advance(Duration::from_secs(5));
        f.engine.wake_due(&f.workflow).await.unwrap();

        let calls = f.dispatcher.two.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(f.dispatcher.one.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_command_fails_process() {
        let f = fixture(0, ApprovalSettings::default());

        let (id, _) = f.engine.start(&f.workflow, json!({})).await.unwrap();
        f.approve(json!({"approved": true})).await;
        let one = f.dispatcher.one.lock().unwrap()[0].clone();
        let two = f.dispatcher.two.lock().unwrap()[0].clone();

        f.engine
            .deliver(&f.workflow, &one, CallbackReport::Failure(Some("disk full".into())))
            .await
            .unwrap();
        let (_, outcome) = f
            .engine
            .deliver(&f.workflow, &two, CallbackReport::Success(json!({"success": true})))
            .await
            .unwrap();

        let RunOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("disk full"));
        assert!(error.contains("branch 0"));
        assert_eq!(f.process_status(&id).await, ProcessStatus::Failed);
    }

    #[test]
    fn approval_payload_forms() {
        assert!(is_approved(&json!({"approved": true})));
        assert!(is_approved(&json!("{\"approved\": true}")));
        assert!(!is_approved(&json!({"approved": false})));
        assert!(!is_approved(&json!("not json")));
        assert!(!is_approved(&Value::Null));
    }

    #[tokio::test]
    async fn storage_failure_does_not_consume_fail_process() {
        let f = fixture_with_repo(FailingAppend::new("start process"), 0, ApprovalSettings::default());
        let (id, _) = f.engine.start(&f.workflow, json!({})).await.unwrap();

        // The approval is recorded, then storing "start process" fails.
        let token = f.notifier.tokens.lock().unwrap()[0].clone();
        let err = f
            .engine
            .deliver(&f.workflow, &token, CallbackReport::Success(json!({"approved": true})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)));

        let execution = f.engine.repository().get_execution(&id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        let log = f.engine.repository().list_checkpoints(&id).await.unwrap();
        assert!(log.iter().all(|c| c.name != "fail process"));
        assert_ne!(f.process_status(&id).await, ProcessStatus::Failed);

        // The next invocation resumes and reaches the commands.
        let outcome = f
            .engine
            .run(&f.workflow, &id, Some(ExecutionEvent::Wake))
            .await
            .unwrap();
        assert!(outcome.is_suspended());
        assert_eq!(f.process_status(&id).await, ProcessStatus::InProgress);

        let one = f.dispatcher.one.lock().unwrap()[0].clone();
        let two = f.dispatcher.two.lock().unwrap()[0].clone();
        f.engine
            .deliver(&f.workflow, &one, CallbackReport::Failure(Some("disk full".to_string())))
            .await
            .unwrap();
        let (_, outcome) = f
            .engine
            .deliver(&f.workflow, &two, CallbackReport::Success(json!({"success": true})))
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(f.process_status(&id).await, ProcessStatus::Failed);
    }
}
