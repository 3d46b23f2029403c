//! Step abstraction: the boundary between the engine and concrete step logic.
//!
//! A step is started once per node execution and resumed every time the
//! node's wait completes. Each call returns a `StepOutput` telling the engine
//! whether the node is done or what it is waiting on next.

pub mod box_step;
pub mod dispatch;
pub mod registry;
pub mod structural;

use std::future::Future;
use std::sync::Arc;

use conductor_types::ambiance::Ambiance;
use conductor_types::execution::{
    ExecutableResponse, ExecutionMode, FailureInfo, FailureType, Outcome, Status,
};
use conductor_types::notify::ResponseMap;
use conductor_types::plan::PlanNode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use box_step::BoxStep;
pub use dispatch::{BoxTaskDispatcher, TaskDispatcher};
pub use registry::StepRegistry;
pub use structural::{ForkStep, SectionChainStep, SectionStep};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures raised by step implementations.
///
/// The engine turns these into `FailureInfo` on an `Errored` node and routes
/// them through the node's advisers.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("invalid step parameters: {0}")]
    InvalidParameters(String),

    #[error("{message}")]
    Execution {
        message: String,
        failure_types: Vec<FailureType>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("task dispatch failed: {0}")]
    Dispatch(String),
}

impl StepError {
    pub fn failure_info(&self) -> FailureInfo {
        let failure_types = match self {
            StepError::Execution { failure_types, .. } => failure_types.clone(),
            StepError::Dispatch(_) => vec![FailureType::DelegateProvisioning],
            StepError::InvalidParameters(_) | StepError::InvalidResponse(_) => {
                vec![FailureType::Unknown]
            }
        };
        FailureInfo::new(self.to_string(), failure_types)
    }
}

// ---------------------------------------------------------------------------
// Context and results
// ---------------------------------------------------------------------------

/// Everything a step sees of the node execution it runs for.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub node_execution_id: Uuid,
    pub ambiance: Ambiance,
    pub node: Arc<PlanNode>,
    /// Decoded step parameters; `Null` when the node has none.
    pub parameters: serde_json::Value,
    /// Responses appended so far, oldest first.
    pub executable_responses: Vec<ExecutableResponse>,
}

impl StepContext {
    pub fn retry_index(&self) -> u32 {
        self.ambiance.current_retry_index()
    }

    /// Deserialize the step parameters into `T`. `Null` parameters are
    /// treated as an empty object.
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let value = if self.parameters.is_null() {
            serde_json::json!({})
        } else {
            self.parameters.clone()
        };
        serde_json::from_value(value).map_err(|e| StepError::InvalidParameters(e.to_string()))
    }
}

/// Final result of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: Status,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
}

impl StepResult {
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            outcomes: Vec::new(),
            failure_info: None,
        }
    }

    pub fn failed(status: Status, failure_info: FailureInfo) -> Self {
        Self {
            status,
            outcomes: Vec::new(),
            failure_info: Some(failure_info),
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcomes.push(outcome);
        self
    }
}

impl From<StepError> for StepResult {
    fn from(err: StepError) -> Self {
        StepResult::failed(Status::Errored, err.failure_info())
    }
}

/// A unit of work handed to the external executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskRequest {
    pub fn new(task_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_name: task_name.into(),
            payload,
        }
    }
}

/// What a step asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Done(StepResult),
    Task(TaskRequest),
    TaskChain {
        task: TaskRequest,
        chain_end: bool,
    },
    Child {
        child_node_id: String,
    },
    Children {
        child_node_ids: Vec<String>,
    },
    ChildChain {
        next_child_id: Option<String>,
        suspend: bool,
        last_link: bool,
    },
}

impl StepOutput {
    /// Mode the output suspends in; `None` for `Done`.
    pub fn mode(&self) -> Option<ExecutionMode> {
        match self {
            StepOutput::Done(_) => None,
            StepOutput::Task(_) => Some(ExecutionMode::Task),
            StepOutput::TaskChain { .. } => Some(ExecutionMode::TaskChain),
            StepOutput::Child { .. } => Some(ExecutionMode::Child),
            StepOutput::Children { .. } => Some(ExecutionMode::Children),
            StepOutput::ChildChain { .. } => Some(ExecutionMode::ChildChain),
        }
    }
}

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// Concrete step logic, looked up by `step_type.type_name`.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods.
pub trait Step: Send + Sync {
    fn start(
        &self,
        ctx: &StepContext,
    ) -> impl Future<Output = Result<StepOutput, StepError>> + Send;

    /// Continue after the node's wait completed. `responses` is the
    /// delivered payload, or the accumulated child summaries when the mode
    /// requires accumulation.
    fn resume(
        &self,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> impl Future<Output = Result<StepOutput, StepError>> + Send;
}
