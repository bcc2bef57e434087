//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `durably-core` using sqlx with split
//! read/write pools. Checkpoint outcomes, execution input/result and poller
//! state are stored as JSON text.

use chrono::{DateTime, Utc};
use durably_core::repository::execution::{AppendOutcome, ExecutionRepository};
use durably_types::error::RepositoryError;
use durably_types::execution::{
    Checkpoint, CheckpointKind, CheckpointOutcome, Execution, ExecutionId, ExecutionStatus,
    PendingWait, WaitKind,
};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{
    format_datetime, is_unique_violation, parse_datetime, parse_json, query_err, to_json,
};

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_name: String,
    status: String,
    input: String,
    result: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        Ok(Execution {
            id: parse_execution_id(&self.id)?,
            workflow_name: self.workflow_name,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            input: parse_json(&self.input, "input")?,
            result: self
                .result
                .as_deref()
                .map(|s| parse_json(s, "result"))
                .transpose()?,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct CheckpointRow {
    seq: i64,
    execution_id: String,
    name: String,
    kind: String,
    outcome: String,
    attempts: i64,
    recorded_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            execution_id: row.try_get("execution_id")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            outcome: row.try_get("outcome")?,
            attempts: row.try_get("attempts")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let kind: CheckpointKind = self.kind.parse().map_err(RepositoryError::Query)?;
        let outcome: CheckpointOutcome = serde_json::from_str(&self.outcome)
            .map_err(|e| RepositoryError::Query(format!("invalid checkpoint outcome: {e}")))?;
        Ok(Checkpoint {
            execution_id: parse_execution_id(&self.execution_id)?,
            name: self.name,
            kind,
            outcome,
            attempts: self.attempts as u32,
            seq: self.seq,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

struct WaitRow {
    execution_id: String,
    name: String,
    kind: String,
    callback_token: Option<String>,
    deadline: Option<String>,
    wake_at: Option<String>,
    attempt: i64,
    state: Option<String>,
    created_at: String,
}

impl WaitRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            callback_token: row.try_get("callback_token")?,
            deadline: row.try_get("deadline")?,
            wake_at: row.try_get("wake_at")?,
            attempt: row.try_get("attempt")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_wait(self) -> Result<PendingWait, RepositoryError> {
        let kind: WaitKind = self.kind.parse().map_err(RepositoryError::Query)?;
        Ok(PendingWait {
            execution_id: parse_execution_id(&self.execution_id)?,
            name: self.name,
            kind,
            callback_token: self.callback_token,
            deadline: self.deadline.as_deref().map(parse_datetime).transpose()?,
            wake_at: self.wake_at.as_deref().map(parse_datetime).transpose()?,
            attempt: self.attempt as u32,
            state: self
                .state
                .as_deref()
                .map(|s| parse_json(s, "state"))
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

const WAIT_COLUMNS: &str =
    "execution_id, name, kind, callback_token, deadline, wake_at, attempt, state, created_at";

fn parse_execution_id(s: &str) -> Result<ExecutionId, RepositoryError> {
    s.parse::<ExecutionId>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn waits_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<PendingWait>, RepositoryError> {
    rows.iter()
        .map(|row| WaitRow::from_row(row).map_err(query_err)?.into_wait())
        .collect()
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_name, status, input, result, error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.workflow_name)
        .bind(execution.status.as_str())
        .bind(to_json(&execution.input)?)
        .bind(execution.result.as_ref().map(to_json).transpose()?)
        .bind(&execution.error)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("execution {} already exists", execution.id))
            } else {
                query_err(e)
            }
        })?;

        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY id DESC LIMIT ?")
                    .bind(s.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM executions ORDER BY id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        rows.iter()
            .map(|row| ExecutionRow::from_row(row).map_err(query_err)?.into_execution())
            .collect()
    }

    async fn finish_execution(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            r#"UPDATE executions
               SET status = ?, result = ?, error = ?, completed_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(status.as_str())
        .bind(result.map(to_json).transpose()?)
        .bind(error)
        .bind(format_datetime(&completed_at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already closed" from "no such execution".
        let exists = sqlx::query("SELECT 1 FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_err)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_checkpoints(&self, id: &ExecutionId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE execution_id = ? ORDER BY seq ASC")
            .bind(id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| CheckpointRow::from_row(row).map_err(query_err)?.into_checkpoint())
            .collect()
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<AppendOutcome, RepositoryError> {
        let status = match checkpoint.outcome {
            CheckpointOutcome::Succeeded { .. } => "succeeded",
            CheckpointOutcome::Failed { .. } => "failed",
        };

        let result = sqlx::query(
            r#"INSERT INTO checkpoints
               (execution_id, name, kind, status, outcome, attempts, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, name) DO NOTHING"#,
        )
        .bind(checkpoint.execution_id.to_string())
        .bind(&checkpoint.name)
        .bind(checkpoint.kind.as_str())
        .bind(status)
        .bind(to_json(&checkpoint.outcome)?)
        .bind(checkpoint.attempts as i64)
        .bind(format_datetime(&checkpoint.recorded_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            Ok(AppendOutcome::AlreadyExists)
        } else {
            Ok(AppendOutcome::Appended)
        }
    }

    async fn upsert_pending_wait(&self, wait: &PendingWait) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO pending_waits
               (execution_id, name, kind, callback_token, deadline, wake_at, next_wake,
                attempt, state, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, name) DO UPDATE SET
                 kind = excluded.kind,
                 callback_token = excluded.callback_token,
                 deadline = excluded.deadline,
                 wake_at = excluded.wake_at,
                 next_wake = excluded.next_wake,
                 attempt = excluded.attempt,
                 state = excluded.state,
                 created_at = excluded.created_at"#,
        )
        .bind(wait.execution_id.to_string())
        .bind(&wait.name)
        .bind(wait.kind.as_str())
        .bind(&wait.callback_token)
        .bind(wait.deadline.as_ref().map(format_datetime))
        .bind(wait.wake_at.as_ref().map(format_datetime))
        .bind(wait.next_wake().as_ref().map(format_datetime))
        .bind(wait.attempt as i64)
        .bind(wait.state.as_ref().map(to_json).transpose()?)
        .bind(format_datetime(&wait.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!(
                    "callback token {} already in use",
                    wait.callback_token.as_deref().unwrap_or_default()
                ))
            } else {
                query_err(e)
            }
        })?;

        Ok(())
    }

    async fn list_pending_waits(&self, id: &ExecutionId) -> Result<Vec<PendingWait>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WAIT_COLUMNS} FROM pending_waits WHERE execution_id = ? ORDER BY created_at ASC, name ASC"
        ))
        .bind(id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        waits_from_rows(&rows)
    }

    async fn find_wait_by_token(&self, token: &str) -> Result<Option<PendingWait>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {WAIT_COLUMNS} FROM pending_waits WHERE callback_token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(WaitRow::from_row(&row).map_err(query_err)?.into_wait()?)),
            None => Ok(None),
        }
    }

    async fn delete_pending_wait(&self, id: &ExecutionId, name: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM pending_waits WHERE execution_id = ? AND name = ?")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(())
    }

    async fn list_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<PendingWait>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WAIT_COLUMNS} FROM pending_waits \
             WHERE next_wake IS NOT NULL AND next_wake <= ? ORDER BY next_wake ASC"
        ))
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        waits_from_rows(&rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use durably_types::execution::{FailureKind, FailureRecord};
    use serde_json::json;

    async fn test_repo() -> SqliteExecutionRepository {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteExecutionRepository::new(DatabasePool::new(&url).await.unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    async fn execution(repo: &SqliteExecutionRepository) -> Execution {
        let execution = Execution::new("process-approval", json!({"source": "test"}), now());
        repo.create_execution(&execution).await.unwrap();
        execution
    }

    fn wait(id: ExecutionId, name: &str, token: Option<&str>) -> PendingWait {
        PendingWait {
            execution_id: id,
            name: name.to_string(),
            kind: WaitKind::Callback,
            callback_token: token.map(str::to_string),
            deadline: Some(now() + Duration::hours(1)),
            wake_at: None,
            attempt: 0,
            state: None,
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_execution() {
        let repo = test_repo().await;
        let created = execution(&repo).await;

        let loaded = repo.get_execution(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.workflow_name, "process-approval");
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.input, json!({"source": "test"}));
        assert_eq!(loaded.started_at, now());
        assert!(loaded.completed_at.is_none());

        assert!(repo.get_execution(&ExecutionId::new()).await.unwrap().is_none());

        let err = repo.create_execution(&created).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_finish_execution_once() {
        let repo = test_repo().await;
        let created = execution(&repo).await;
        let result = json!({"status": "success"});

        let closed = repo
            .finish_execution(&created.id, ExecutionStatus::Succeeded, Some(&result), None, now())
            .await
            .unwrap();
        assert!(closed);

        let again = repo
            .finish_execution(&created.id, ExecutionStatus::Failed, None, Some("late"), now())
            .await
            .unwrap();
        assert!(!again);

        let loaded = repo.get_execution(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Succeeded);
        assert_eq!(loaded.result, Some(result));
        assert!(loaded.error.is_none());

        let missing = repo
            .finish_execution(&ExecutionId::new(), ExecutionStatus::Failed, None, None, now())
            .await
            .unwrap_err();
        assert!(matches!(missing, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_executions_by_status() {
        let repo = test_repo().await;
        let first = execution(&repo).await;
        let second = execution(&repo).await;
        repo.finish_execution(&first.id, ExecutionStatus::Failed, None, Some("boom"), now())
            .await
            .unwrap();

        let all = repo.list_executions(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);

        let failed = repo
            .list_executions(Some(ExecutionStatus::Failed), 10)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("boom"));

        assert_eq!(repo.list_executions(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_checkpoint_is_conditional() {
        let repo = test_repo().await;
        let created = execution(&repo).await;

        let first = Checkpoint::succeeded(created.id, "create process", CheckpointKind::Step, json!("p-1"), 1, now());
        let second = Checkpoint::failed(
            created.id,
            "ask for approval",
            CheckpointKind::Callback,
            FailureRecord::new(FailureKind::Callback, "rejected"),
            1,
            now(),
        );
        let loser = Checkpoint::succeeded(created.id, "create process", CheckpointKind::Step, json!("p-2"), 2, now());

        assert_eq!(repo.append_checkpoint(&first).await.unwrap(), AppendOutcome::Appended);
        assert_eq!(repo.append_checkpoint(&second).await.unwrap(), AppendOutcome::Appended);
        assert_eq!(repo.append_checkpoint(&loser).await.unwrap(), AppendOutcome::AlreadyExists);

        let log = repo.list_checkpoints(&created.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].name, "create process");
        assert_eq!(log[0].outcome, CheckpointOutcome::Succeeded { result: json!("p-1") });
        assert!(log[0].seq < log[1].seq);
        assert_eq!(log[1].kind, CheckpointKind::Callback);
        assert!(!log[1].is_success());
    }

    #[tokio::test]
    async fn test_pending_wait_lifecycle() {
        let repo = test_repo().await;
        let created = execution(&repo).await;

        repo.upsert_pending_wait(&wait(created.id, "ask for approval", Some("tok-1")))
            .await
            .unwrap();
        let found = repo.find_wait_by_token("tok-1").await.unwrap().unwrap();
        assert_eq!(found.name, "ask for approval");
        assert_eq!(found.deadline, Some(now() + Duration::hours(1)));

        // Upsert replaces in place.
        let mut retry = wait(created.id, "ask for approval", Some("tok-1"));
        retry.kind = WaitKind::Retry;
        retry.attempt = 2;
        retry.state = Some(json!({"n": 1}));
        repo.upsert_pending_wait(&retry).await.unwrap();
        let waits = repo.list_pending_waits(&created.id).await.unwrap();
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].kind, WaitKind::Retry);
        assert_eq!(waits[0].attempt, 2);
        assert_eq!(waits[0].state, Some(json!({"n": 1})));

        // A token belongs to exactly one wait.
        let err = repo
            .upsert_pending_wait(&wait(created.id, "command one", Some("tok-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        repo.delete_pending_wait(&created.id, "ask for approval").await.unwrap();
        repo.delete_pending_wait(&created.id, "ask for approval").await.unwrap();
        assert!(repo.find_wait_by_token("tok-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_due_waits() {
        let repo = test_repo().await;
        let created = execution(&repo).await;

        let mut poll = wait(created.id, "check", None);
        poll.kind = WaitKind::Condition;
        poll.deadline = None;
        poll.wake_at = Some(now() + Duration::minutes(10));
        repo.upsert_pending_wait(&poll).await.unwrap();
        repo.upsert_pending_wait(&wait(created.id, "approval", Some("tok")))
            .await
            .unwrap();
        let mut open = wait(created.id, "open", Some("tok-open"));
        open.deadline = None;
        repo.upsert_pending_wait(&open).await.unwrap();

        assert!(repo.list_due_waits(now()).await.unwrap().is_empty());

        let due = repo.list_due_waits(now() + Duration::minutes(10)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "check");

        let due = repo.list_due_waits(now() + Duration::hours(2)).await.unwrap();
        let names: Vec<&str> = due.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["check", "approval"]);
    }
}
