//! Event types for the orchestration event bus.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionMode, Status};

/// Lifecycle events emitted by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A node execution was created and queued.
    NodeStarted {
        node_execution_id: Uuid,
        node_id: String,
        plan_execution_id: String,
        retry_index: u32,
    },

    NodeStatusChanged {
        node_execution_id: Uuid,
        from: Status,
        to: Status,
    },

    /// The node appended an executable response and is now waiting.
    NodeSuspended {
        node_execution_id: Uuid,
        mode: ExecutionMode,
    },

    NodeResumed {
        node_execution_id: Uuid,
        accumulated: bool,
    },

    /// An adviser produced a response for a broke node.
    NodeAdvised {
        node_execution_id: Uuid,
        adviser_type: String,
        response_kind: String,
    },
}

impl OrchestrationEvent {
    pub fn node_execution_id(&self) -> Uuid {
        match self {
            OrchestrationEvent::NodeStarted {
                node_execution_id, ..
            }
            | OrchestrationEvent::NodeStatusChanged {
                node_execution_id, ..
            }
            | OrchestrationEvent::NodeSuspended {
                node_execution_id, ..
            }
            | OrchestrationEvent::NodeResumed {
                node_execution_id, ..
            }
            | OrchestrationEvent::NodeAdvised {
                node_execution_id, ..
            } => *node_execution_id,
        }
    }
}
