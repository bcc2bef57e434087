//! HTTP/REST API layer for durably.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format and CORS
//! support. The callback endpoint is how external parties report outcomes.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
