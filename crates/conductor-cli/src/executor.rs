//! Simulated task executor.
//!
//! Dispatched tasks complete on a background tokio task after a fixed delay
//! by delivering a response through the waiter under the task's correlation
//! id. A task whose parameters carry `fail_attempts: n` fails its first `n`
//! attempts with a `CONNECTIVITY` error response.

use std::sync::Arc;
use std::time::Duration;

use conductor_core::step::{StepError, TaskDispatcher, TaskRequest};
use conductor_core::waiter::Waiter;
use conductor_types::ambiance::Ambiance;
use conductor_types::execution::FailureType;
use conductor_types::notify::{ErrorNotifyData, ResponseData};

pub struct SimulatedExecutor<W> {
    waiter: Arc<W>,
    delay: Duration,
}

impl<W: Waiter + 'static> SimulatedExecutor<W> {
    pub fn new(waiter: Arc<W>, delay: Duration) -> Self {
        Self { waiter, delay }
    }
}

/// What the executor will answer for `request` on attempt `retry_index`.
pub(crate) fn simulate(request: &TaskRequest, retry_index: u32) -> Result<ResponseData, ErrorNotifyData> {
    let fail_attempts = request
        .payload
        .get("fail_attempts")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if u64::from(retry_index) < fail_attempts {
        return Err(ErrorNotifyData {
            error_message: format!(
                "task '{}' failed on attempt {}",
                request.task_name,
                retry_index + 1
            ),
            failure_types: vec![FailureType::Connectivity],
        });
    }
    Ok(serde_json::json!({
        "task": request.task_name,
        "attempt": retry_index + 1,
        "output": request.payload.get("output").cloned().unwrap_or(serde_json::Value::Null),
    }))
}

impl<W: Waiter + 'static> TaskDispatcher for SimulatedExecutor<W> {
    async fn dispatch(
        &self,
        correlation_id: &str,
        ambiance: &Ambiance,
        request: &TaskRequest,
    ) -> Result<(), StepError> {
        let outcome = simulate(request, ambiance.current_retry_index());
        let waiter = Arc::clone(&self.waiter);
        let delay = self.delay;
        let correlation_id = correlation_id.to_string();
        let task_name = request.task_name.clone();

        tracing::debug!(correlation_id = %correlation_id, task = %task_name, "task dispatched");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let delivered = match outcome {
                Ok(data) => waiter.done_with(&correlation_id, data).await,
                Err(error) => match serde_json::to_value(&error) {
                    Ok(data) => waiter.done_with_error(&correlation_id, data).await,
                    Err(e) => {
                        tracing::error!(correlation_id = %correlation_id, error = %e, "failed to encode task error");
                        return;
                    }
                },
            };
            if let Err(e) = delivered {
                tracing::warn!(correlation_id = %correlation_id, task = %task_name, error = %e, "task response not delivered");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_without_fail_attempts() {
        let request = TaskRequest::new("build", serde_json::json!({ "output": "ok" }));
        let data = simulate(&request, 0).unwrap();
        assert_eq!(data["task"], "build");
        assert_eq!(data["attempt"], 1);
        assert_eq!(data["output"], "ok");
    }

    #[test]
    fn fails_first_attempts() {
        let request = TaskRequest::new("deploy", serde_json::json!({ "fail_attempts": 2 }));
        let err = simulate(&request, 1).unwrap_err();
        assert_eq!(err.failure_types, vec![FailureType::Connectivity]);
        assert!(err.error_message.contains("attempt 2"));
        assert!(simulate(&request, 2).is_ok());
    }
}
