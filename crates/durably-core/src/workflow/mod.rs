//! Durable execution engine.
//!
//! - `context` -- per-invocation replay state shared by the primitives
//! - `step` -- checkpointed units of work with retry policies
//! - `callback` -- suspend until an external report or a deadline
//! - `condition` -- poll a check with backoff until the strategy stops
//! - `parallel` -- concurrent branches with aggregated outcomes
//! - `engine` -- replay driver, event application, terminal transitions
//! - `idempotency` -- at-most-once-within-TTL guard for commands
//! - `retry`, `clock`, `scheduler` -- policy and host seams

pub mod callback;
pub mod clock;
pub mod condition;
pub mod context;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod parallel;
pub mod retry;
pub mod scheduler;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use callback::CallbackConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{ConditionConfig, WaitDecision};
pub use context::DurableContext;
pub use engine::{
    CallbackReport, EngineError, ExecutionEngine, ExecutionEvent, RunOutcome, Workflow,
};
pub use error::{DurableError, TaskError};
pub use idempotency::IdempotencyGuard;
pub use parallel::{BatchResult, Branch, BranchResult, BranchStatus, CompletionReason};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{ChannelWakeScheduler, NoopWakeScheduler, RecordingWakeScheduler, WakeRequest, WakeScheduler};
