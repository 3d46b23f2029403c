//! Orchestration core for Conductor.
//!
//! This crate holds the engine driver and the ports it runs against: the
//! node execution store, the plan source, the waiter and the step/task
//! dispatch boundary. It depends only on `conductor-types`; SQLite
//! persistence lives in `conductor-infra`.

pub mod advise;
pub mod codec;
pub mod engine;
pub mod event;
pub mod plan;
pub mod repository;
pub mod step;
pub mod waiter;
