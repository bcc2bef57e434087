//! Durable execution engine and repository trait definitions for durably.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, the replay-driven engine with its durable primitives, and
//! the process approval workflow built on top of them. It depends only on
//! `durably-types` -- never on `durably-infra` or any database/IO crate.

pub mod approval;
pub mod repository;
pub mod workflow;
