//! BoxExecutionRepository -- object-safe dynamic dispatch wrapper for ExecutionRepository.
//!
//! Same blanket-impl pattern as the other boxed ports:
//! 1. Define an object-safe `ExecutionRepositoryDyn` trait with boxed futures
//! 2. Blanket-impl `ExecutionRepositoryDyn` for all `T: ExecutionRepository`
//! 3. `BoxExecutionRepository` wraps `Box<dyn ExecutionRepositoryDyn>` and delegates
//!
//! The engine context is cloned into every primitive and parallel branch, so it
//! holds the repository behind this wrapper instead of a generic parameter.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use durably_types::error::RepositoryError;
use durably_types::execution::{
    Checkpoint, Execution, ExecutionId, ExecutionStatus, PendingWait,
};

use super::execution::{AppendOutcome, ExecutionRepository};

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`ExecutionRepository`] with boxed futures.
pub trait ExecutionRepositoryDyn: Send + Sync {
    fn create_execution_boxed<'a>(&'a self, execution: &'a Execution) -> BoxFut<'a, ()>;

    fn get_execution_boxed<'a>(&'a self, id: &'a ExecutionId) -> BoxFut<'a, Option<Execution>>;

    fn list_executions_boxed<'a>(
        &'a self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> BoxFut<'a, Vec<Execution>>;

    fn finish_execution_boxed<'a>(
        &'a self,
        id: &'a ExecutionId,
        status: ExecutionStatus,
        result: Option<&'a serde_json::Value>,
        error: Option<&'a str>,
        completed_at: DateTime<Utc>,
    ) -> BoxFut<'a, bool>;

    fn list_checkpoints_boxed<'a>(&'a self, id: &'a ExecutionId) -> BoxFut<'a, Vec<Checkpoint>>;

    fn append_checkpoint_boxed<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFut<'a, AppendOutcome>;

    fn upsert_pending_wait_boxed<'a>(&'a self, wait: &'a PendingWait) -> BoxFut<'a, ()>;

    fn list_pending_waits_boxed<'a>(&'a self, id: &'a ExecutionId) -> BoxFut<'a, Vec<PendingWait>>;

    fn find_wait_by_token_boxed<'a>(&'a self, token: &'a str) -> BoxFut<'a, Option<PendingWait>>;

    fn delete_pending_wait_boxed<'a>(&'a self, id: &'a ExecutionId, name: &'a str) -> BoxFut<'a, ()>;

    fn list_due_waits_boxed<'a>(&'a self, now: DateTime<Utc>) -> BoxFut<'a, Vec<PendingWait>>;
}

/// Blanket implementation: any `ExecutionRepository` automatically implements
/// `ExecutionRepositoryDyn`.
impl<T: ExecutionRepository> ExecutionRepositoryDyn for T {
    fn create_execution_boxed<'a>(&'a self, execution: &'a Execution) -> BoxFut<'a, ()> {
        Box::pin(self.create_execution(execution))
    }

    fn get_execution_boxed<'a>(&'a self, id: &'a ExecutionId) -> BoxFut<'a, Option<Execution>> {
        Box::pin(self.get_execution(id))
    }

    fn list_executions_boxed<'a>(
        &'a self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> BoxFut<'a, Vec<Execution>> {
        Box::pin(self.list_executions(status, limit))
    }

    fn finish_execution_boxed<'a>(
        &'a self,
        id: &'a ExecutionId,
        status: ExecutionStatus,
        result: Option<&'a serde_json::Value>,
        error: Option<&'a str>,
        completed_at: DateTime<Utc>,
    ) -> BoxFut<'a, bool> {
        Box::pin(self.finish_execution(id, status, result, error, completed_at))
    }

    fn list_checkpoints_boxed<'a>(&'a self, id: &'a ExecutionId) -> BoxFut<'a, Vec<Checkpoint>> {
        Box::pin(self.list_checkpoints(id))
    }

    fn append_checkpoint_boxed<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFut<'a, AppendOutcome> {
        Box::pin(self.append_checkpoint(checkpoint))
    }

    fn upsert_pending_wait_boxed<'a>(&'a self, wait: &'a PendingWait) -> BoxFut<'a, ()> {
        Box::pin(self.upsert_pending_wait(wait))
    }

    fn list_pending_waits_boxed<'a>(&'a self, id: &'a ExecutionId) -> BoxFut<'a, Vec<PendingWait>> {
        Box::pin(self.list_pending_waits(id))
    }

    fn find_wait_by_token_boxed<'a>(&'a self, token: &'a str) -> BoxFut<'a, Option<PendingWait>> {
        Box::pin(self.find_wait_by_token(token))
    }

    fn delete_pending_wait_boxed<'a>(&'a self, id: &'a ExecutionId, name: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.delete_pending_wait(id, name))
    }

    fn list_due_waits_boxed<'a>(&'a self, now: DateTime<Utc>) -> BoxFut<'a, Vec<PendingWait>> {
        Box::pin(self.list_due_waits(now))
    }
}

/// Type-erased execution repository.
///
/// Since `ExecutionRepository` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxExecutionRepository` provides equivalent methods that delegate
/// to the inner `ExecutionRepositoryDyn` trait object.
pub struct BoxExecutionRepository {
    inner: Box<dyn ExecutionRepositoryDyn + Send + Sync>,
}

impl BoxExecutionRepository {
    /// Wrap a concrete `ExecutionRepository` in a type-erased box.
    pub fn new<T: ExecutionRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.inner.create_execution_boxed(execution).await
    }

    pub async fn get_execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        self.inner.get_execution_boxed(id).await
    }

    pub async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        self.inner.list_executions_boxed(status, limit).await
    }

    pub async fn finish_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner
            .finish_execution_boxed(id, status, result, error, completed_at)
            .await
    }

    pub async fn list_checkpoints(&self, id: &ExecutionId) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.list_checkpoints_boxed(id).await
    }

    pub async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, RepositoryError> {
        self.inner.append_checkpoint_boxed(checkpoint).await
    }

    pub async fn upsert_pending_wait(&self, wait: &PendingWait) -> Result<(), RepositoryError> {
        self.inner.upsert_pending_wait_boxed(wait).await
    }

    pub async fn list_pending_waits(&self, id: &ExecutionId) -> Result<Vec<PendingWait>, RepositoryError> {
        self.inner.list_pending_waits_boxed(id).await
    }

    pub async fn find_wait_by_token(&self, token: &str) -> Result<Option<PendingWait>, RepositoryError> {
        self.inner.find_wait_by_token_boxed(token).await
    }

    pub async fn delete_pending_wait(&self, id: &ExecutionId, name: &str) -> Result<(), RepositoryError> {
        self.inner.delete_pending_wait_boxed(id, name).await
    }

    pub async fn list_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<PendingWait>, RepositoryError> {
        self.inner.list_due_waits_boxed(now).await
    }
}
