//! Notify callbacks and their type-erased wrapper.
//!
//! Follows the same blanket-impl pattern as the other boxed ports:
//! 1. Define an object-safe `NotifyCallbackDyn` trait with boxed futures
//! 2. Blanket-impl `NotifyCallbackDyn` for all `T: NotifyCallback`
//! 3. `BoxNotifyCallback` wraps `Box<dyn NotifyCallbackDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use conductor_types::notify::ResponseMap;

/// Continuation invoked once every key of a wait registration has a response.
pub trait NotifyCallback: Send + Sync {
    /// All responses were successful.
    fn notify(&self, responses: ResponseMap) -> impl Future<Output = ()> + Send;

    /// At least one response was delivered as an error.
    fn notify_error(&self, responses: ResponseMap) -> impl Future<Output = ()> + Send;
}

/// Object-safe version of [`NotifyCallback`] with boxed futures.
pub trait NotifyCallbackDyn: Send + Sync {
    fn notify_boxed<'a>(
        &'a self,
        responses: ResponseMap,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    fn notify_error_boxed<'a>(
        &'a self,
        responses: ResponseMap,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

impl<T: NotifyCallback> NotifyCallbackDyn for T {
    fn notify_boxed<'a>(
        &'a self,
        responses: ResponseMap,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.notify(responses))
    }

    fn notify_error_boxed<'a>(
        &'a self,
        responses: ResponseMap,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.notify_error(responses))
    }
}

/// Type-erased notify callback, stored by waiters until their keys complete.
pub struct BoxNotifyCallback {
    inner: Box<dyn NotifyCallbackDyn + Send + Sync>,
}

impl BoxNotifyCallback {
    pub fn new<T: NotifyCallback + 'static>(callback: T) -> Self {
        Self {
            inner: Box::new(callback),
        }
    }

    pub async fn notify(&self, responses: ResponseMap) {
        self.inner.notify_boxed(responses).await
    }

    pub async fn notify_error(&self, responses: ResponseMap) {
        self.inner.notify_error_boxed(responses).await
    }
}

impl std::fmt::Debug for BoxNotifyCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxNotifyCallback").finish_non_exhaustive()
    }
}
