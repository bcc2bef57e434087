//! Idempotency marker store trait definition.

use chrono::{DateTime, Utc};
use durably_types::error::RepositoryError;
use durably_types::idempotency::IdempotencyRecord;

/// Storage for command de-duplication markers.
///
/// Expired markers behave as absent. Implementations are free to delete them
/// lazily; `purge_expired` exists for hosts that want to reclaim space.
pub trait IdempotencyStore: Send + Sync {
    /// Whether an unexpired marker with this id exists at `now`.
    fn exists(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Insert or replace a marker.
    fn put(
        &self,
        record: &IdempotencyRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete every marker expired at `now`. Returns the number removed.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
