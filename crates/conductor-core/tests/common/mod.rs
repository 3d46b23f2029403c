//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor_core::advise::{AdviseError, Adviser, AdviserChain, AdviserRegistry, is_adviseable};
use conductor_core::codec::{ParameterCodec, VersionedJsonCodec};
use conductor_core::engine::{EngineParts, OrchestrationEngine};
use conductor_core::plan::{compile_plan, parse_plan_yaml};
use conductor_core::repository::memory::InMemoryNodeExecutionStore;
use conductor_core::repository::node_execution::NodeExecutionStore;
use conductor_core::step::{
    BoxStep, BoxTaskDispatcher, SectionChainStep, SectionStep, Step, StepContext, StepError,
    StepOutput, StepRegistry, StepResult, TaskDispatcher, TaskRequest,
};
use conductor_core::waiter::{WaitNotifyEngine, Waiter};
use conductor_types::advise::{AdviserResponse, AdvisingEvent};
use conductor_types::ambiance::Ambiance;
use conductor_types::config::EngineConfig;
use conductor_types::execution::{FailureInfo, FailureType, NodeExecution, Outcome, Status};
use conductor_types::notify::ResponseMap;
use conductor_types::plan::AdviserType;
use serde::Deserialize;
use uuid::Uuid;

pub type TestEngine = OrchestrationEngine<InMemoryNodeExecutionStore, WaitNotifyEngine>;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Finishes immediately with a `result` outcome.
pub struct SucceedStep;

impl Step for SucceedStep {
    async fn start(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::Done(StepResult::succeeded().with_outcome(
            Outcome::new("result", "value", serde_json::json!({ "ok": true })),
        )))
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        _responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        Err(StepError::InvalidResponse("sync step resumed".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct FlakyParameters {
    #[serde(default = "always")]
    fail_until: u32,
    #[serde(default)]
    failure_type: Option<FailureType>,
}

fn always() -> u32 {
    u32::MAX
}

/// Fails while the retry index is below `fail_until`.
pub struct FlakyStep;

impl Step for FlakyStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: FlakyParameters = ctx.parameters_as()?;
        if ctx.retry_index() < params.fail_until {
            return Err(StepError::Execution {
                message: format!("attempt {} failed", ctx.retry_index()),
                failure_types: vec![params.failure_type.unwrap_or(FailureType::Connectivity)],
            });
        }
        Ok(StepOutput::Done(StepResult::succeeded()))
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        _responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        Err(StepError::InvalidResponse("sync step resumed".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TaskParameters {
    #[serde(default = "default_task")]
    task: String,
}

fn default_task() -> String {
    "run".to_string()
}

/// Dispatches one task and finishes with its response as the `result` outcome.
///
/// A response `{"status": "failed"}` fails the step.
pub struct TaskStep;

impl Step for TaskStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: TaskParameters = ctx.parameters_as()?;
        Ok(StepOutput::Task(TaskRequest::new(
            params.task,
            ctx.parameters.clone(),
        )))
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        let Some(value) = responses.into_values().next() else {
            return Err(StepError::InvalidResponse("no task response".to_string()));
        };
        if value.get("status").and_then(|s| s.as_str()) == Some("failed") {
            return Ok(StepOutput::Done(StepResult::failed(
                Status::Failed,
                FailureInfo::new("task reported failure", [FailureType::Application]),
            )));
        }
        Ok(StepOutput::Done(
            StepResult::succeeded().with_outcome(Outcome::new("result", "task", value)),
        ))
    }
}

/// Sleeps `START_DELAY` in `start`, then dispatches a task.
pub struct SlowTaskStep;

pub const START_DELAY: Duration = Duration::from_millis(200);

impl Step for SlowTaskStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        tokio::time::sleep(START_DELAY).await;
        TaskStep.start(ctx).await
    }

    async fn resume(
        &self,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        TaskStep.resume(ctx, responses).await
    }
}

/// Forks the node named by its `twin` parameter twice.
pub struct TwinForkStep;

impl Step for TwinForkStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let twin = ctx
            .parameters
            .get("twin")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(StepOutput::Children {
            child_node_ids: vec![twin.clone(), twin],
        })
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        _responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        Err(StepError::InvalidResponse("twin fork resumed".to_string()))
    }
}

/// Wraps a step and records every resume input it receives.
pub struct RecordingStep<T> {
    inner: T,
    seen: Arc<Mutex<Vec<ResponseMap>>>,
}

impl<T: Step> Step for RecordingStep<T> {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.inner.start(ctx).await
    }

    async fn resume(
        &self,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        self.seen.lock().unwrap().push(responses.clone());
        self.inner.resume(ctx, responses).await
    }
}

// ---------------------------------------------------------------------------
// Dispatcher and advisers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub correlation_id: String,
    pub task_name: String,
    pub runtime_id: String,
}

/// Records dispatched tasks; tasks named `broken` fail to dispatch.
pub struct RecordingDispatcher {
    dispatched: Arc<Mutex<Vec<Dispatched>>>,
}

impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        correlation_id: &str,
        ambiance: &Ambiance,
        request: &TaskRequest,
    ) -> Result<(), StepError> {
        if request.task_name == "broken" {
            return Err(StepError::Dispatch("no delegate available".to_string()));
        }
        let runtime_id = ambiance
            .current_runtime_id()
            .map_err(|e| StepError::Dispatch(e.to_string()))?
            .to_string();
        self.dispatched.lock().unwrap().push(Dispatched {
            correlation_id: correlation_id.to_string(),
            task_name: request.task_name.clone(),
            runtime_id,
        });
        Ok(())
    }
}

/// Accepts every adviseable event with `End` and counts its decisions.
pub struct CountingAdviser {
    pub calls: Arc<AtomicUsize>,
}

impl Adviser for CountingAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new("COUNTING")
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        Ok(is_adviseable(event))
    }

    fn on_advise_event(&self, _event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AdviserResponse::End)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Arc<TestEngine>,
    pub store: Arc<InMemoryNodeExecutionStore>,
    pub waiter: Arc<WaitNotifyEngine>,
    pub dispatched: Arc<Mutex<Vec<Dispatched>>>,
    pub resumes: Arc<Mutex<Vec<ResponseMap>>>,
    pub adviser_calls: Arc<AtomicUsize>,
    pub plan_id: String,
    pub plan_execution_id: String,
    pub root: String,
}

impl Harness {
    pub fn new(yaml: &str) -> Self {
        let codec: Arc<dyn ParameterCodec> = Arc::new(VersionedJsonCodec);
        let doc = parse_plan_yaml(yaml).unwrap();
        let plan = compile_plan(&doc, codec.as_ref()).unwrap();

        let resumes = Arc::new(Mutex::new(Vec::new()));
        let mut steps = StepRegistry::with_structural_steps();
        steps.register(
            "SECTION",
            BoxStep::new(RecordingStep {
                inner: SectionStep,
                seen: resumes.clone(),
            }),
        );
        steps.register(
            "SECTION_CHAIN",
            BoxStep::new(RecordingStep {
                inner: SectionChainStep,
                seen: resumes.clone(),
            }),
        );
        steps.register("SUCCEED", BoxStep::new(SucceedStep));
        steps.register("FLAKY", BoxStep::new(FlakyStep));
        steps.register("TASK", BoxStep::new(TaskStep));
        steps.register("SLOW_TASK", BoxStep::new(SlowTaskStep));
        steps.register("TWIN_FORK", BoxStep::new(TwinForkStep));

        let config = EngineConfig::default();
        let adviser_calls = Arc::new(AtomicUsize::new(0));
        let mut advisers =
            AdviserRegistry::with_defaults(codec.clone(), config.default_intervention_timeout_secs);
        advisers.register(Arc::new(CountingAdviser {
            calls: adviser_calls.clone(),
        }));

        let store = Arc::new(InMemoryNodeExecutionStore::new());
        let waiter = Arc::new(WaitNotifyEngine::new());
        let dispatched = Arc::new(Mutex::new(Vec::new()));

        let engine = OrchestrationEngine::new(EngineParts {
            store: store.clone(),
            waiter: waiter.clone(),
            plan: Arc::new(plan),
            steps,
            advisers: AdviserChain::new(advisers),
            dispatcher: BoxTaskDispatcher::new(RecordingDispatcher {
                dispatched: dispatched.clone(),
            }),
            codec,
            config,
        });

        Self {
            engine,
            store,
            waiter,
            dispatched,
            resumes,
            adviser_calls,
            plan_id: doc.plan_id.clone(),
            plan_execution_id: Uuid::now_v7().to_string(),
            root: doc.root.clone(),
        }
    }

    pub fn ambiance(&self) -> Ambiance {
        Ambiance::new(self.plan_execution_id.clone(), self.plan_id.clone())
    }

    /// Start the plan's root node.
    pub async fn start(&self) -> Uuid {
        self.engine
            .start_node(&self.ambiance(), &self.root, None)
            .await
            .unwrap()
    }

    pub async fn get(&self, id: Uuid) -> NodeExecution {
        self.store.get(id).await.unwrap().unwrap()
    }

    pub async fn children(&self, parent: Uuid, only_active: bool) -> Vec<NodeExecution> {
        self.store.list_children(parent, only_active).await.unwrap()
    }

    /// The single active child of `parent` with setup id `node_id`.
    pub async fn child(&self, parent: Uuid, node_id: &str) -> NodeExecution {
        self.children(parent, true)
            .await
            .into_iter()
            .find(|c| c.node_id == node_id)
            .unwrap()
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn resumes(&self) -> Vec<ResponseMap> {
        self.resumes.lock().unwrap().clone()
    }

    pub fn adviser_calls(&self) -> usize {
        self.adviser_calls.load(Ordering::SeqCst)
    }

    /// Deliver a successful response for the task dispatched for `runtime_id`.
    pub async fn complete_task(&self, runtime_id: Uuid, data: serde_json::Value) {
        let correlation_id = self.correlation_id_for(runtime_id);
        self.waiter.done_with(&correlation_id, data).await.unwrap();
    }

    pub fn correlation_id_for(&self, runtime_id: Uuid) -> String {
        self.dispatched()
            .into_iter()
            .rev()
            .find(|d| d.runtime_id == runtime_id.to_string())
            .map(|d| d.correlation_id)
            .unwrap()
    }
}
