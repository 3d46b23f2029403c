//! Leaf steps available to plans run from the CLI.
//!
//! `TASK` dispatches one task to the simulated executor and finishes with
//! its response. `ECHO` finishes synchronously with its `message`.

use conductor_core::step::{
    BoxStep, Step, StepContext, StepError, StepOutput, StepRegistry, StepResult, TaskRequest,
};
use conductor_types::execution::Outcome;
use conductor_types::notify::ResponseMap;
use serde::Deserialize;

pub const TASK: &str = "TASK";
pub const ECHO: &str = "ECHO";

/// Structural steps plus the CLI leaf steps.
pub fn cli_step_registry() -> StepRegistry {
    let mut registry = StepRegistry::with_structural_steps();
    registry.register(TASK, BoxStep::new(TaskStep));
    registry.register(ECHO, BoxStep::new(EchoStep));
    registry
}

#[derive(Debug, Deserialize)]
struct TaskParameters {
    /// Task name handed to the executor; defaults to the node identifier.
    #[serde(default)]
    task: Option<String>,
}

pub struct TaskStep;

impl Step for TaskStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: TaskParameters = ctx.parameters_as()?;
        let task_name = params
            .task
            .unwrap_or_else(|| ctx.node.identifier.clone());
        Ok(StepOutput::Task(TaskRequest::new(
            task_name,
            ctx.parameters.clone(),
        )))
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        let Some(value) = responses.into_values().next() else {
            return Err(StepError::InvalidResponse(
                "task resumed without a response".to_string(),
            ));
        };
        Ok(StepOutput::Done(
            StepResult::succeeded().with_outcome(Outcome::new("result", "task", value)),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct EchoParameters {
    #[serde(default)]
    message: serde_json::Value,
}

pub struct EchoStep;

impl Step for EchoStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: EchoParameters = ctx.parameters_as()?;
        Ok(StepOutput::Done(
            StepResult::succeeded().with_outcome(Outcome::new("message", "echo", params.message)),
        ))
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        _responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        Err(StepError::InvalidResponse(
            "echo steps never suspend".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use conductor_types::ambiance::{Ambiance, StepCategory, StepType};
    use conductor_types::execution::Status;
    use conductor_types::plan::PlanNode;
    use uuid::Uuid;

    fn ctx(parameters: serde_json::Value) -> StepContext {
        StepContext {
            node_execution_id: Uuid::now_v7(),
            ambiance: Ambiance::new("exec", "plan"),
            node: Arc::new(PlanNode {
                uuid: "build".to_string(),
                identifier: "build".to_string(),
                name: "Build".to_string(),
                step_type: StepType::new(TASK, StepCategory::Step),
                group: None,
                step_parameters: Vec::new(),
                adviser_obtainments: Vec::new(),
                facilitator_obtainments: Vec::new(),
            }),
            parameters,
            executable_responses: Vec::new(),
        }
    }

    #[tokio::test]
    async fn task_name_defaults_to_identifier() {
        let out = TaskStep.start(&ctx(serde_json::Value::Null)).await.unwrap();
        let StepOutput::Task(request) = out else {
            panic!("expected a task");
        };
        assert_eq!(request.task_name, "build");
    }

    #[tokio::test]
    async fn task_resume_records_response() {
        let mut responses = ResponseMap::new();
        responses.insert("c-1".to_string(), serde_json::json!({ "output": 3 }));
        let out = TaskStep
            .resume(&ctx(serde_json::Value::Null), responses)
            .await
            .unwrap();
        let StepOutput::Done(result) = out else {
            panic!("expected done");
        };
        assert_eq!(result.status, Status::Succeeded);
        assert_eq!(result.outcomes[0].data, serde_json::json!({ "output": 3 }));
    }

    #[tokio::test]
    async fn echo_finishes_synchronously() {
        let out = EchoStep
            .start(&ctx(serde_json::json!({ "message": "hi" })))
            .await
            .unwrap();
        assert!(matches!(out, StepOutput::Done(ref r) if r.outcomes[0].data == "hi"));
    }

    #[test]
    fn registry_has_cli_steps() {
        let names = cli_step_registry();
        assert!(names.get(TASK).is_some());
        assert!(names.get(ECHO).is_some());
        assert!(names.get("SECTION").is_some());
    }
}
