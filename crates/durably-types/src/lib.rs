//! Shared domain types for durably.
//!
//! This crate contains the core domain types used across the engine:
//! executions, checkpoints, pending waits, idempotency markers, business
//! processes, configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod idempotency;
pub mod process;
