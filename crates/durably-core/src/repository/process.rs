//! Process repository trait definition.
//!
//! Business records created and advanced by the approval workflow.

use chrono::{DateTime, Utc};
use durably_types::error::RepositoryError;
use durably_types::process::{Process, ProcessStatus};
use uuid::Uuid;

/// Repository trait for process records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ProcessRepository: Send + Sync {
    /// Insert a new process record.
    fn create_process(
        &self,
        process: &Process,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a process status. Returns `RepositoryError::NotFound` for an unknown id.
    fn set_process_status(
        &self,
        id: &Uuid,
        status: ProcessStatus,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a process by its ID.
    fn get_process(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Process>, RepositoryError>> + Send;

    /// List every process currently in `status`.
    fn find_by_status(
        &self,
        status: ProcessStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Process>, RepositoryError>> + Send;
}
