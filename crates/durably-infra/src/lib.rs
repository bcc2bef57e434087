//! Infrastructure layer for durably.
//!
//! Contains implementations of the ports defined in `durably-core`: SQLite
//! storage for executions, idempotency markers and processes, the
//! `config.toml` loader, and the outbound HTTP adapters used by the approval
//! workflow.

pub mod config;
pub mod outbound;
pub mod sqlite;
