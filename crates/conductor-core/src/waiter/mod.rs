//! Resume/notify subsystem.
//!
//! A node that suspends registers a callback against one or more correlation
//! keys. Responses for those keys arrive through `done_with` /
//! `done_with_error`, possibly more than once and possibly before the
//! registration exists. The waiter fires each registration exactly once,
//! when every key has a response.

pub mod accumulate;
pub mod callback;
pub mod engine;

use conductor_types::notify::ResponseData;
use thiserror::Error;

pub use callback::{BoxNotifyCallback, NotifyCallback};
pub use engine::WaitNotifyEngine;

#[derive(Debug, Error)]
pub enum WaiterError {
    #[error("wait registration needs at least one correlation key")]
    NoKeys,

    #[error("correlation key '{0}' is already registered")]
    DuplicateKey(String),
}

/// Boundary to the async notification channel.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Waiter: Send + Sync {
    /// Register `callback` to fire once every key in `keys` has a response.
    /// Returns the wait id.
    fn register_callback(
        &self,
        keys: Vec<String>,
        callback: BoxNotifyCallback,
    ) -> impl std::future::Future<Output = Result<String, WaiterError>> + Send;

    /// Deliver a successful response for `correlation_id`.
    fn done_with(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> impl std::future::Future<Output = Result<(), WaiterError>> + Send;

    /// Deliver an error response for `correlation_id`.
    fn done_with_error(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> impl std::future::Future<Output = Result<(), WaiterError>> + Send;

    /// Drop every registration waiting on any of `keys` without firing it.
    /// Later responses for `keys` are discarded. Returns how many
    /// registrations were dropped.
    fn cancel_keys(
        &self,
        keys: &[String],
    ) -> impl std::future::Future<Output = usize> + Send;
}
