//! Execution repository trait definition.
//!
//! Defines the storage interface for executions, their checkpoint logs, and
//! open pending waits. The infrastructure layer (durably-infra) implements
//! this trait with SQLite persistence; `repository::memory` provides an
//! in-process implementation.

use chrono::{DateTime, Utc};
use durably_types::error::RepositoryError;
use durably_types::execution::{
    Checkpoint, Execution, ExecutionId, ExecutionStatus, PendingWait,
};

/// Result of a conditional checkpoint append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The checkpoint was written.
    Appended,
    /// A checkpoint with the same name already exists; nothing was written.
    AlreadyExists,
}

/// Repository trait for durable execution state.
///
/// Covers three entity families:
/// - **Executions:** create, inspect, and close execution records.
/// - **Checkpoints:** the append-only, name-keyed log of completed work.
/// - **Pending waits:** open suspension points and their wake-up times.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its ID.
    fn get_execution(
        &self,
        id: &ExecutionId,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List executions, newest first, optionally filtered by status.
    fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Close a running execution.
    ///
    /// Returns `false` (and changes nothing) when the execution was already
    /// closed, so the terminal transition happens at most once.
    fn finish_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// List an execution's checkpoints in append order.
    fn list_checkpoints(
        &self,
        id: &ExecutionId,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Append a checkpoint only if no checkpoint with the same name exists.
    fn append_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<AppendOutcome, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Pending waits
    // -----------------------------------------------------------------------

    /// Insert or replace the pending wait for `(execution_id, name)`.
    fn upsert_pending_wait(
        &self,
        wait: &PendingWait,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List the open waits of an execution.
    fn list_pending_waits(
        &self,
        id: &ExecutionId,
    ) -> impl std::future::Future<Output = Result<Vec<PendingWait>, RepositoryError>> + Send;

    /// Find the callback wait that owns a token.
    fn find_wait_by_token(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<PendingWait>, RepositoryError>> + Send;

    /// Remove a pending wait. Removing a missing wait is not an error.
    fn delete_pending_wait(
        &self,
        id: &ExecutionId,
        name: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List waits whose wake-up time or deadline is at or before `now`.
    fn list_due_waits(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<PendingWait>, RepositoryError>> + Send;
}
