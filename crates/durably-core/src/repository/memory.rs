//! In-process repository implementations.
//!
//! Used by the engine tests and by hosts that do not need state to survive a
//! restart. Each store keeps its state behind a single mutex so the
//! conditional operations (`append_checkpoint`, `finish_execution`) are atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use durably_types::error::RepositoryError;
use durably_types::execution::{
    Checkpoint, Execution, ExecutionId, ExecutionStatus, PendingWait,
};
use durably_types::idempotency::IdempotencyRecord;
use durably_types::process::{Process, ProcessStatus};
use uuid::Uuid;

use super::execution::{AppendOutcome, ExecutionRepository};
use super::idempotency::IdempotencyStore;
use super::process::ProcessRepository;

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Query("in-memory store lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// InMemoryExecutionRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ExecutionState {
    executions: HashMap<ExecutionId, Execution>,
    checkpoints: HashMap<ExecutionId, Vec<Checkpoint>>,
    waits: HashMap<(ExecutionId, String), PendingWait>,
    next_seq: i64,
}

/// Execution store backed by process memory.
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    state: Mutex<ExecutionState>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if state.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.executions.get(id).cloned())
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut executions: Vec<Execution> = state
            .executions
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.id.cmp(&a.id));
        executions.truncate(limit as usize);
        Ok(executions)
    }

    async fn finish_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let execution = state
            .executions
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        if execution.is_closed() {
            return Ok(false);
        }
        execution.status = status;
        execution.result = result.cloned();
        execution.error = error.map(str::to_string);
        execution.completed_at = Some(completed_at);
        Ok(true)
    }

    async fn list_checkpoints(&self, id: &ExecutionId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.checkpoints.get(id).cloned().unwrap_or_default())
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, RepositoryError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let exists = state
            .checkpoints
            .get(&checkpoint.execution_id)
            .is_some_and(|log| log.iter().any(|c| c.name == checkpoint.name));
        if exists {
            return Ok(AppendOutcome::AlreadyExists);
        }
        state.next_seq += 1;
        let mut stored = checkpoint.clone();
        stored.seq = state.next_seq;
        state
            .checkpoints
            .entry(checkpoint.execution_id)
            .or_default()
            .push(stored);
        Ok(AppendOutcome::Appended)
    }

    async fn upsert_pending_wait(&self, wait: &PendingWait) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if let Some(token) = &wait.callback_token {
            let taken = state.waits.values().any(|w| {
                w.callback_token.as_ref() == Some(token)
                    && (w.execution_id != wait.execution_id || w.name != wait.name)
            });
            if taken {
                return Err(RepositoryError::Conflict(format!(
                    "callback token {token} already in use"
                )));
            }
        }
        state
            .waits
            .insert((wait.execution_id, wait.name.clone()), wait.clone());
        Ok(())
    }

    async fn list_pending_waits(&self, id: &ExecutionId) -> Result<Vec<PendingWait>, RepositoryError> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut waits: Vec<PendingWait> = state
            .waits
            .values()
            .filter(|w| w.execution_id == *id)
            .cloned()
            .collect();
        waits.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(waits)
    }

    async fn find_wait_by_token(&self, token: &str) -> Result<Option<PendingWait>, RepositoryError> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state
            .waits
            .values()
            .find(|w| w.callback_token.as_deref() == Some(token))
            .cloned())
    }

    async fn delete_pending_wait(&self, id: &ExecutionId, name: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.waits.remove(&(*id, name.to_string()));
        Ok(())
    }

    async fn list_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<PendingWait>, RepositoryError> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut due: Vec<PendingWait> = state
            .waits
            .values()
            .filter(|w| w.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|w| w.next_wake());
        Ok(due)
    }
}

// ---------------------------------------------------------------------------
// InMemoryIdempotencyStore
// ---------------------------------------------------------------------------

/// Idempotency markers backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    markers: DashMap<String, IdempotencyRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn exists(&self, id: &str, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        Ok(self
            .markers
            .get(id)
            .is_some_and(|record| !record.is_expired(now)))
    }

    async fn put(&self, record: &IdempotencyRecord) -> Result<(), RepositoryError> {
        self.markers.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let before = self.markers.len();
        self.markers.retain(|_, record| !record.is_expired(now));
        Ok((before - self.markers.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// InMemoryProcessRepository
// ---------------------------------------------------------------------------

/// Process records backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryProcessRepository {
    processes: DashMap<Uuid, Process>,
}

impl InMemoryProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessRepository for InMemoryProcessRepository {
    async fn create_process(&self, process: &Process) -> Result<(), RepositoryError> {
        self.processes.insert(process.id, process.clone());
        Ok(())
    }

    async fn set_process_status(
        &self,
        id: &Uuid,
        status: ProcessStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut process = self.processes.get_mut(id).ok_or(RepositoryError::NotFound)?;
        process.status = status;
        process.updated_at = updated_at;
        Ok(())
    }

    async fn get_process(&self, id: &Uuid) -> Result<Option<Process>, RepositoryError> {
        Ok(self.processes.get(id).map(|p| p.clone()))
    }

    async fn find_by_status(&self, status: ProcessStatus) -> Result<Vec<Process>, RepositoryError> {
        let mut found: Vec<Process> = self
            .processes
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.clone())
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
