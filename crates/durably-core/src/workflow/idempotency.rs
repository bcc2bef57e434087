//! Idempotency guard for side-effecting commands.
//!
//! Best-effort at-most-once within the marker TTL: the marker is written only
//! after the command succeeds, so a crash between the two can still produce a
//! duplicate on the next attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use durably_types::idempotency::{IdempotencyRecord, marker_id};

use crate::repository::idempotency::IdempotencyStore;

use super::clock::Clock;
use super::error::TaskError;

/// Runs a named command at most once per key within the TTL window.
pub struct IdempotencyGuard<S: IdempotencyStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl<S: IdempotencyStore> IdempotencyGuard<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    /// Run `f` unless an unexpired marker for `(key, command)` exists.
    ///
    /// Returns `true` when `f` ran. Errors from `f` propagate and leave no
    /// marker behind, so the next call runs it again.
    pub async fn execute_once<F, Fut, E>(&self, key: &str, command: &str, f: F) -> Result<bool, TaskError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<TaskError>,
    {
        let id = marker_id(key, command);
        if self.store.exists(&id, self.clock.now()).await? {
            tracing::debug!(marker = %id, "command already executed, skipping");
            return Ok(false);
        }

        f().await.map_err(Into::into)?;

        let record = IdempotencyRecord::new(key, command, self.clock.now(), self.ttl);
        self.store.put(&record).await?;
        tracing::debug!(marker = %id, expires_at = %record.expires_at, "command executed");
        Ok(true)
    }
}
