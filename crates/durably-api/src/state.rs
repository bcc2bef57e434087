//! Application state wiring the engine, the approval workflow and storage.
//!
//! AppState holds the concrete instances used by both CLI and REST API. The
//! workflow is generic over its ports; AppState pins them to the SQLite
//! stores and the endpoint-configured outbound adapters.

use std::path::PathBuf;
use std::sync::Arc;

use durably_core::approval::{ApprovalSettings, ApprovalWorkflow};
use durably_core::workflow::{ExecutionEngine, NoopWakeScheduler, WakeScheduler};
use durably_infra::config::{data_dir, database_url, ensure_data_dir, load_global_config};
use durably_infra::outbound::{ConfiguredDispatcher, ConfiguredNotifier};
use durably_infra::sqlite::{
    DatabasePool, PoolSettings, SqliteExecutionRepository, SqliteIdempotencyStore,
    SqliteProcessRepository,
};
use durably_types::config::GlobalConfig;

/// The approval workflow pinned to the infra implementations.
pub type ConcreteApprovalWorkflow = ApprovalWorkflow<
    SqliteProcessRepository,
    SqliteIdempotencyStore,
    ConfiguredNotifier,
    ConfiguredDispatcher,
>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
    pub workflow: Arc<ConcreteApprovalWorkflow>,
    pub markers: Arc<SqliteIdempotencyStore>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize from the data directory with no wake-up scheduling.
    ///
    /// One-shot CLI commands use this; due waits are picked up later by
    /// `durably wake` or the server's sweep.
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_with_scheduler(Arc::new(NoopWakeScheduler)).await
    }

    /// Initialize from the data directory, routing wake-ups to `scheduler`.
    pub async fn init_with_scheduler(scheduler: Arc<dyn WakeScheduler>) -> anyhow::Result<Self> {
        let data_dir = data_dir()?;
        ensure_data_dir(&data_dir).await?;
        let config = load_global_config(&data_dir).await;
        Self::build(data_dir, config, scheduler).await
    }

    /// Wire everything from an explicit directory and configuration.
    pub async fn build(
        data_dir: PathBuf,
        config: GlobalConfig,
        scheduler: Arc<dyn WakeScheduler>,
    ) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::connect(
            &database_url(&config, &data_dir),
            &PoolSettings::from_config(&config),
        )
        .await?;

        let engine = ExecutionEngine::new(SqliteExecutionRepository::new(db_pool.clone()))
            .with_scheduler(scheduler)
            .with_execution_timeout(Some(config.execution_timeout()));

        let markers = Arc::new(SqliteIdempotencyStore::new(db_pool.clone()));
        let workflow = ApprovalWorkflow::new(
            Arc::new(SqliteProcessRepository::new(db_pool.clone())),
            Arc::clone(&markers),
            Arc::new(ConfiguredNotifier::from_endpoints(&config.endpoints)?),
            Arc::new(ConfiguredDispatcher::from_endpoints(&config.endpoints)?),
            Arc::clone(engine.clock()),
            ApprovalSettings::from_config(&config),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            engine,
            workflow: Arc::new(workflow),
            markers,
            config: Arc::new(config),
            data_dir,
        })
    }

    /// State over a throwaway database, for tests.
    #[cfg(test)]
    pub async fn for_tests(scheduler: Arc<dyn WakeScheduler>) -> Self {
        Self::for_tests_with(GlobalConfig::default(), scheduler).await
    }

    /// Like [`AppState::for_tests`] with an explicit configuration.
    #[cfg(test)]
    pub async fn for_tests_with(config: GlobalConfig, scheduler: Arc<dyn WakeScheduler>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);
        Self::build(data_dir, config, scheduler).await.unwrap()
    }
}
