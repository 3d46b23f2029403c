//! BoxStep -- object-safe dynamic dispatch wrapper for Step.
//!
//! 1. `StepDyn` is the object-safe form of `Step` with boxed futures
//! 2. Blanket-impl `StepDyn` for all `T: Step`
//! 3. `BoxStep` wraps `Box<dyn StepDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use conductor_types::notify::ResponseMap;

use super::{Step, StepContext, StepError, StepOutput};

/// Object-safe version of [`Step`] with boxed futures.
pub trait StepDyn: Send + Sync {
    fn start_boxed<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutput, StepError>> + Send + 'a>>;

    fn resume_boxed<'a>(
        &'a self,
        ctx: &'a StepContext,
        responses: ResponseMap,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutput, StepError>> + Send + 'a>>;
}

impl<T: Step> StepDyn for T {
    fn start_boxed<'a>(
        &'a self,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutput, StepError>> + Send + 'a>> {
        Box::pin(self.start(ctx))
    }

    fn resume_boxed<'a>(
        &'a self,
        ctx: &'a StepContext,
        responses: ResponseMap,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutput, StepError>> + Send + 'a>> {
        Box::pin(self.resume(ctx, responses))
    }
}

/// Type-erased step for the step registry.
pub struct BoxStep {
    inner: Box<dyn StepDyn + Send + Sync>,
}

impl BoxStep {
    pub fn new<T: Step + 'static>(step: T) -> Self {
        Self {
            inner: Box::new(step),
        }
    }

    pub async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.inner.start_boxed(ctx).await
    }

    pub async fn resume(
        &self,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        self.inner.resume_boxed(ctx, responses).await
    }
}
