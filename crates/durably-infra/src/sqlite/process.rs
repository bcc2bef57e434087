//! SQLite process repository implementation.

use chrono::{DateTime, Utc};
use durably_core::repository::process::ProcessRepository;
use durably_types::error::RepositoryError;
use durably_types::process::{Process, ProcessStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_err};

/// SQLite-backed implementation of `ProcessRepository`.
pub struct SqliteProcessRepository {
    pool: DatabasePool,
}

impl SqliteProcessRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn process_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Process, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_err)?;

    Ok(Process {
        id: id
            .parse::<Uuid>()
            .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?,
        status: status.parse().map_err(RepositoryError::Query)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

impl ProcessRepository for SqliteProcessRepository {
    async fn create_process(&self, process: &Process) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO processes (id, status, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(process.id.to_string())
            .bind(process.status.as_str())
            .bind(format_datetime(&process.created_at))
            .bind(format_datetime(&process.updated_at))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(())
    }

    async fn set_process_status(
        &self,
        id: &Uuid,
        status: ProcessStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE processes SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_datetime(&updated_at))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        tracing::debug!(process_id = %id, status = %status, "process status updated");
        Ok(())
    }

    async fn get_process(&self, id: &Uuid) -> Result<Option<Process>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM processes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(process_from_row).transpose()
    }

    async fn find_by_status(&self, status: ProcessStatus) -> Result<Vec<Process>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM processes WHERE status = ? ORDER BY created_at ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(process_from_row).collect()
    }
}
