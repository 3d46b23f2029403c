//! Observability setup for Conductor binaries.

pub mod tracing_setup;
