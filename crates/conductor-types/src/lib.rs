//! Shared domain types for Conductor.
//!
//! This crate contains the types passed between the orchestration engine, its
//! stores and its hosts: the ambiance level stack, plan nodes, node executions,
//! executable responses, adviser inputs/outputs and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod advise;
pub mod ambiance;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod notify;
pub mod plan;
