//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (durably-infra) implements. The core crate never depends on any
//! specific storage technology; `memory` holds the in-process adapters.

pub mod box_execution;
pub mod execution;
pub mod idempotency;
pub mod memory;
pub mod process;

pub use box_execution::BoxExecutionRepository;
pub use execution::{AppendOutcome, ExecutionRepository};
pub use idempotency::IdempotencyStore;
pub use process::ProcessRepository;
