//! Task dispatch boundary.
//!
//! The engine hands `TaskRequest`s to a `TaskDispatcher` after registering
//! the node's wait. The dispatcher delivers the result later through the
//! waiter using the same correlation id.

use std::future::Future;
use std::pin::Pin;

use conductor_types::ambiance::Ambiance;

use super::{StepError, TaskRequest};

pub trait TaskDispatcher: Send + Sync {
    fn dispatch(
        &self,
        correlation_id: &str,
        ambiance: &Ambiance,
        request: &TaskRequest,
    ) -> impl Future<Output = Result<(), StepError>> + Send;
}

/// Object-safe version of [`TaskDispatcher`] with boxed futures.
pub trait TaskDispatcherDyn: Send + Sync {
    fn dispatch_boxed<'a>(
        &'a self,
        correlation_id: &'a str,
        ambiance: &'a Ambiance,
        request: &'a TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;
}

impl<T: TaskDispatcher> TaskDispatcherDyn for T {
    fn dispatch_boxed<'a>(
        &'a self,
        correlation_id: &'a str,
        ambiance: &'a Ambiance,
        request: &'a TaskRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>> {
        Box::pin(self.dispatch(correlation_id, ambiance, request))
    }
}

/// Type-erased task dispatcher.
pub struct BoxTaskDispatcher {
    inner: Box<dyn TaskDispatcherDyn + Send + Sync>,
}

impl BoxTaskDispatcher {
    pub fn new<T: TaskDispatcher + 'static>(dispatcher: T) -> Self {
        Self {
            inner: Box::new(dispatcher),
        }
    }

    pub async fn dispatch(
        &self,
        correlation_id: &str,
        ambiance: &Ambiance,
        request: &TaskRequest,
    ) -> Result<(), StepError> {
        self.inner
            .dispatch_boxed(correlation_id, ambiance, request)
            .await
    }
}
