//! Lifecycle event bus.
//!
//! The engine publishes an `OrchestrationEvent` on every status change,
//! suspension, resume and adviser decision. Subscribers (the CLI progress
//! view, tests) read them from a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
