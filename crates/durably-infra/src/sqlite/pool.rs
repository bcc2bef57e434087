//! SQLite connection pools for the execution store.
//!
//! Writes go through a single connection: the conditional checkpoint append
//! and the conditional close of an execution depend on that serialization.
//! Reads use a separate read-only pool, so API status queries never queue
//! behind the writer. An in-memory database is private to its connection,
//! so it gets one connection shared by both sides.

use std::str::FromStr;
use std::time::Duration;

use durably_types::config::GlobalConfig;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Connection tunables, usually taken from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Wait on a locked database before returning `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    /// Read-only connections for file databases.
    pub max_readers: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

impl PoolSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            busy_timeout: config.database_busy_timeout(),
            max_readers: config.database_max_readers.max(1),
        }
    }
}

/// Reader and writer pools over one database.
///
/// Repositories run SELECTs on `reader` and everything else on `writer`.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open `database_url` with default settings and run migrations.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect(database_url, &PoolSettings::default()).await
    }

    /// Open `database_url` and run migrations before any reader connects.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .busy_timeout(settings.busy_timeout)
            .create_if_missing(true);

        if is_in_memory(database_url) {
            let shared = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?;
            MIGRATOR.run(&shared).await?;
            tracing::debug!(database_url, "in-memory database ready");
            return Ok(Self {
                reader: shared.clone(),
                writer: shared,
            });
        }

        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        MIGRATOR.run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(settings.max_readers)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(
            database_url,
            readers = settings.max_readers,
            busy_timeout_ms = settings.busy_timeout.as_millis() as u64,
            "database pool ready"
        );
        Ok(Self { reader, writer })
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
