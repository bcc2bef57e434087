//! REST API handlers.

pub mod callback;
pub mod execution;
