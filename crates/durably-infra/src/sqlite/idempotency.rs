//! SQLite idempotency marker store.

use chrono::{DateTime, Utc};
use durably_core::repository::idempotency::IdempotencyStore;
use durably_types::error::RepositoryError;
use durably_types::idempotency::IdempotencyRecord;

use super::pool::DatabasePool;
use super::{format_datetime, query_err};

/// SQLite-backed implementation of `IdempotencyStore`.
pub struct SqliteIdempotencyStore {
    pool: DatabasePool,
}

impl SqliteIdempotencyStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl IdempotencyStore for SqliteIdempotencyStore {
    async fn exists(&self, id: &str, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM idempotency_markers WHERE id = ? AND expires_at > ?")
            .bind(id)
            .bind(format_datetime(&now))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        Ok(row.is_some())
    }

    async fn put(&self, record: &IdempotencyRecord) -> Result<(), RepositoryError> {
        // An expired marker with the same id is replaced.
        sqlx::query(
            r#"INSERT INTO idempotency_markers (id, created_at, expires_at)
               VALUES (?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at"#,
        )
        .bind(&record.id)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.expires_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM idempotency_markers WHERE expires_at <= ?")
            .bind(format_datetime(&now))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() > 0 {
            tracing::debug!(purged = result.rows_affected(), "purged expired idempotency markers");
        }
        Ok(result.rows_affected())
    }
}
