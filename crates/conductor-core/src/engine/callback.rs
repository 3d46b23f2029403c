//! The single resume entry point handed to the waiter.

use std::sync::Weak;

use conductor_types::ambiance::Ambiance;
use conductor_types::notify::ResponseMap;
use uuid::Uuid;

use super::OrchestrationEngine;
use crate::repository::node_execution::NodeExecutionStore;
use crate::waiter::{NotifyCallback, Waiter};

/// Resumes a node when its wait completes.
///
/// With a node execution id the callback resumes that node (`notify` on the
/// success path, `notify_error` on the errored path). With only an ambiance
/// it runs the queued execution named by the ambiance's current runtime id.
/// The id wins when both are set.
///
/// Holds the engine weakly: a callback that outlives its engine does nothing.
pub struct ResumeCallback<S, W> {
    engine: Weak<OrchestrationEngine<S, W>>,
    node_execution_id: Option<Uuid>,
    ambiance: Option<Ambiance>,
}

impl<S, W> ResumeCallback<S, W> {
    pub fn for_node(engine: Weak<OrchestrationEngine<S, W>>, node_execution_id: Uuid) -> Self {
        Self {
            engine,
            node_execution_id: Some(node_execution_id),
            ambiance: None,
        }
    }

    pub fn for_ambiance(engine: Weak<OrchestrationEngine<S, W>>, ambiance: Ambiance) -> Self {
        Self {
            engine,
            node_execution_id: None,
            ambiance: Some(ambiance),
        }
    }

    pub fn node_execution_id(&self) -> Option<Uuid> {
        self.node_execution_id
    }
}

impl<S, W> ResumeCallback<S, W>
where
    S: NodeExecutionStore + 'static,
    W: Waiter + 'static,
{
    async fn deliver(&self, responses: ResponseMap, is_error: bool) {
        let Some(engine) = self.engine.upgrade() else {
            tracing::debug!("engine dropped before resume");
            return;
        };

        let result = match (self.node_execution_id, &self.ambiance) {
            (Some(id), _) => engine.resume(id, responses, is_error).await,
            (None, Some(ambiance)) => engine.resume_from_ambiance(ambiance.clone()).await,
            (None, None) => {
                tracing::warn!("resume callback carries neither node id nor ambiance");
                return;
            }
        };

        if let Err(e) = result {
            tracing::error!(
                node_execution_id = ?self.node_execution_id,
                error = %e,
                "resume failed"
            );
        }
    }
}

impl<S, W> NotifyCallback for ResumeCallback<S, W>
where
    S: NodeExecutionStore + 'static,
    W: Waiter + 'static,
{
    async fn notify(&self, responses: ResponseMap) {
        self.deliver(responses, false).await;
    }

    async fn notify_error(&self, responses: ResponseMap) {
        self.deliver(responses, true).await;
    }
}
