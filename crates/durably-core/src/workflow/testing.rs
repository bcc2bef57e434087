//! Shared fixtures for engine and primitive tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use durably_types::execution::{Execution, ExecutionId};
use serde_json::json;

use crate::repository::box_execution::BoxExecutionRepository;
use crate::repository::memory::InMemoryExecutionRepository;

use super::clock::ManualClock;
use super::context::DurableContext;
use super::engine::ExecutionEngine;
use super::scheduler::RecordingWakeScheduler;

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// In-memory repository, manual clock and recording scheduler wired together.
pub(crate) struct Harness {
    pub repo: Arc<BoxExecutionRepository>,
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<RecordingWakeScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            repo: Arc::new(BoxExecutionRepository::new(InMemoryExecutionRepository::new())),
            clock: Arc::new(ManualClock::new(epoch())),
            scheduler: Arc::new(RecordingWakeScheduler::new()),
        }
    }

    pub fn engine(&self) -> ExecutionEngine {
        ExecutionEngine::from_shared(Arc::clone(&self.repo))
            .with_clock(self.clock.clone())
            .with_scheduler(self.scheduler.clone())
    }

    /// Create a bare execution record for primitive-level tests.
    pub async fn execution(&self) -> ExecutionId {
        let execution = Execution::new("test", json!({}), epoch());
        self.repo.create_execution(&execution).await.unwrap();
        execution.id
    }

    /// Load a fresh context, as a new invocation would.
    pub async fn context(&self, id: ExecutionId) -> DurableContext {
        let checkpoints = self.repo.list_checkpoints(&id).await.unwrap();
        let waits = self.repo.list_pending_waits(&id).await.unwrap();
        DurableContext::new(
            id,
            Arc::clone(&self.repo),
            self.clock.clone(),
            self.scheduler.clone(),
            checkpoints,
            waits,
        )
    }
}
