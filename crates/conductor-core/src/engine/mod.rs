//! Orchestration engine driver.
//!
//! `OrchestrationEngine` walks node executions through their lifecycle:
//!
//! ```text
//! Queued -> Running -> { TaskWaiting | AsyncWaiting } -> Running -> ... -> final
//!                   \-> broke -> advisers -> { retry | InterventionWaiting | final }
//! ```
//!
//! Every status write goes through the store's version check. A node that
//! suspends registers a `ResumeCallback` with the waiter before anything that
//! could complete the wait (dispatching a task, starting a child) happens.
//! A finished node with a parent notifies the parent's wait with its
//! `StepResponseNotifyData`.

pub mod callback;
pub mod error;
mod intervention;

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::advise::{AdviserResponse, AdvisingEvent};
use conductor_types::ambiance::{Ambiance, Level};
use conductor_types::config::EngineConfig;
use conductor_types::error::AmbianceError;
use conductor_types::event::OrchestrationEvent;
use conductor_types::execution::{
    ChildRef, ExecutableResponse, FailureInfo, FailureType, NodeExecution, Outcome, Status,
};
use conductor_types::notify::{ErrorNotifyData, ResponseMap, StepResponseNotifyData};
use conductor_types::plan::PlanNode;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::advise::{AdviseError, AdviserChain};
use crate::codec::{ParameterCodec, decode_parameters};
use crate::event::EventBus;
use crate::repository::node_execution::{NodeExecutionStore, StatusUpdate};
use crate::repository::plan::PlanSource;
use crate::step::{
    BoxStep, BoxTaskDispatcher, StepContext, StepError, StepOutput, StepRegistry, StepResult,
    TaskRequest,
};
use crate::waiter::accumulate::accumulate_child_responses;
use crate::waiter::{BoxNotifyCallback, Waiter};

pub use callback::ResumeCallback;
pub use error::EngineError;

/// Correlation key an externally resumed chain link waits on.
pub fn chain_resume_key(node_execution_id: Uuid) -> String {
    format!("{node_execution_id}-chain-resume")
}

/// Everything the engine is assembled from.
pub struct EngineParts<S, W> {
    pub store: Arc<S>,
    pub waiter: Arc<W>,
    pub plan: Arc<dyn PlanSource>,
    pub steps: StepRegistry,
    pub advisers: AdviserChain,
    pub dispatcher: BoxTaskDispatcher,
    pub codec: Arc<dyn ParameterCodec>,
    pub config: EngineConfig,
}

pub struct OrchestrationEngine<S, W> {
    store: Arc<S>,
    waiter: Arc<W>,
    plan: Arc<dyn PlanSource>,
    steps: StepRegistry,
    advisers: AdviserChain,
    dispatcher: BoxTaskDispatcher,
    codec: Arc<dyn ParameterCodec>,
    config: EngineConfig,
    events: EventBus,
    weak: Weak<Self>,
}

impl<S, W> OrchestrationEngine<S, W>
where
    S: NodeExecutionStore + 'static,
    W: Waiter + 'static,
{
    pub fn new(parts: EngineParts<S, W>) -> Arc<Self> {
        let events = EventBus::new(parts.config.event_bus_capacity);
        Arc::new_cyclic(|weak| Self {
            store: parts.store,
            waiter: parts.waiter,
            plan: parts.plan,
            steps: parts.steps,
            advisers: parts.advisers,
            dispatcher: parts.dispatcher,
            codec: parts.codec,
            config: parts.config,
            events,
            weak: weak.clone(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn waiter(&self) -> &Arc<W> {
        &self.waiter
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Create a Queued execution of `setup_id` under `parent_ambiance` and run it.
    ///
    /// Returns once the node finished or suspended.
    pub async fn start_node(
        &self,
        parent_ambiance: &Ambiance,
        setup_id: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Uuid, EngineError> {
        let id = Uuid::now_v7();
        self.create_execution(id, parent_ambiance, setup_id, parent_id)
            .await?;
        self.run_queued(id).await?;
        Ok(id)
    }

    /// Move a Queued execution to Running and start its step.
    ///
    /// Anything other than Queued is left alone.
    pub fn run_queued(&self, id: Uuid) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let current = self.fetch(id).await?;
            if current.status != Status::Queued {
                tracing::debug!(node_execution_id = %id, status = %current.status, "not queued, skipping run");
                return Ok(());
            }
            let node = self.node(&current.node_id)?;
            let step = self.step_for(&current)?;

            let Some(ne) = self
                .transition(id, Status::Running, StatusUpdate::none(), |ne| {
                    ne.status == Status::Queued
                })
                .await?
            else {
                tracing::debug!(node_execution_id = %id, "run claimed elsewhere");
                return Ok(());
            };

            tracing::info!(
                node_execution_id = %id,
                node = %ne.identifier,
                step_type = %ne.step_type.type_name,
                retry_index = ne.ambiance.current_retry_index(),
                "starting node"
            );

            let ctx = self.step_context(&ne, node.clone())?;
            let output = step.start(&ctx).await.unwrap_or_else(|e| {
                tracing::warn!(node_execution_id = %id, error = %e, "step start failed");
                StepOutput::Done(e.into())
            });

            if let StepOutput::Done(result) = output {
                let Some(ne) = self.append_response(id, ExecutableResponse::Sync {}).await? else {
                    return Ok(());
                };
                return self.conclude(ne, &node, result).await;
            }
            self.process_output(ne, &node, output).await
        })
    }

    /// Continue a waiting node with the responses its wait collected.
    ///
    /// A final node ignores the call. A node that is not waiting, or never
    /// suspended, logs and ignores it. Claiming the node (waiting to Running)
    /// is version checked, so concurrent resumes of one wait run the step once.
    pub fn resume(
        &self,
        id: Uuid,
        responses: ResponseMap,
        is_error: bool,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let current = self.fetch(id).await?;
            if current.status.is_final() {
                tracing::debug!(node_execution_id = %id, status = %current.status, "resume of final node ignored");
                return Ok(());
            }
            if !matches!(current.status, Status::AsyncWaiting | Status::TaskWaiting)
                || current.executable_responses.is_empty()
            {
                tracing::warn!(node_execution_id = %id, status = %current.status, "resume of node that is not suspended ignored");
                return Ok(());
            }

            let error_info = is_error.then(|| {
                decode_error_payload(&responses).unwrap_or_else(|| {
                    tracing::warn!(node_execution_id = %id, "undecodable error response");
                    FailureInfo::new(
                        "error response could not be decoded",
                        [FailureType::Unknown],
                    )
                })
            });

            let node = self.node(&current.node_id)?;
            let step = self.step_for(&current)?;

            let Some(ne) = self
                .transition(id, Status::Running, StatusUpdate::none(), |ne| {
                    matches!(ne.status, Status::AsyncWaiting | Status::TaskWaiting)
                })
                .await?
            else {
                tracing::debug!(node_execution_id = %id, "resume claimed elsewhere");
                return Ok(());
            };

            if let Some(info) = error_info {
                return self
                    .conclude(ne, &node, StepResult::failed(Status::Errored, info))
                    .await;
            }

            let accumulated = ne.requires_accumulation();
            let input = if accumulated {
                accumulate_child_responses(self.store.as_ref(), id).await?
            } else {
                responses
            };
            self.events.publish(OrchestrationEvent::NodeResumed {
                node_execution_id: id,
                accumulated,
            });
            tracing::debug!(node_execution_id = %id, accumulated, entries = input.len(), "resuming node");

            let ctx = self.step_context(&ne, node.clone())?;
            let output = step.resume(&ctx, input).await.unwrap_or_else(|e| {
                tracing::warn!(node_execution_id = %id, error = %e, "step resume failed");
                StepOutput::Done(e.into())
            });
            self.process_output(ne, &node, output).await
        })
    }

    /// Run whatever queued execution the ambiance's current level names.
    pub fn resume_from_ambiance(
        &self,
        ambiance: Ambiance,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            let runtime_id = ambiance.current_runtime_id()?;
            let id = Uuid::parse_str(runtime_id)
                .map_err(|_| AmbianceError::InvalidRuntimeId(runtime_id.to_string()))?;
            self.run_queued(id).await
        })
    }

    /// Deliver the external resume a suspended chain link waits for.
    pub async fn resume_chain(&self, node_execution_id: Uuid) -> Result<(), EngineError> {
        self.waiter
            .done_with(&chain_resume_key(node_execution_id), serde_json::json!({}))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Output processing
    // -----------------------------------------------------------------------

    async fn process_output(
        &self,
        ne: NodeExecution,
        node: &Arc<PlanNode>,
        output: StepOutput,
    ) -> Result<(), EngineError> {
        match output {
            StepOutput::Done(result) => self.conclude(ne, node, result).await,

            StepOutput::Task(task) => {
                let correlation_id = Uuid::now_v7().to_string();
                let response = ExecutableResponse::Task {
                    correlation_ids: vec![correlation_id.clone()],
                    task_name: task.task_name.clone(),
                };
                self.suspend_on_task(ne, node, response, correlation_id, task)
                    .await
            }

            StepOutput::TaskChain { task, chain_end } => {
                let correlation_id = Uuid::now_v7().to_string();
                let response = ExecutableResponse::TaskChain {
                    correlation_id: correlation_id.clone(),
                    task_name: task.task_name.clone(),
                    chain_end,
                };
                self.suspend_on_task(ne, node, response, correlation_id, task)
                    .await
            }

            StepOutput::Child { child_node_id } => {
                self.node(&child_node_id)?;
                let child_id = Uuid::now_v7();
                let Some(ne) = self
                    .append_response(
                        ne.uuid,
                        ExecutableResponse::Child {
                            child_node_id: child_node_id.clone(),
                            child_execution_id: child_id,
                        },
                    )
                    .await?
                else {
                    return Ok(());
                };
                self.register_resume(&ne, vec![child_id.to_string()]).await?;
                self.start_child(&ne, &child_node_id, child_id).await
            }

            StepOutput::Children { child_node_ids } => {
                if child_node_ids.is_empty() {
                    return self.conclude(ne, node, StepResult::succeeded()).await;
                }
                for child_node_id in &child_node_ids {
                    self.node(child_node_id)?;
                }
                if let Some(duplicate) = first_duplicate(&child_node_ids) {
                    let err = StepError::InvalidResponse(format!(
                        "child '{duplicate}' requested more than once"
                    ));
                    return self.conclude(ne, node, err.into()).await;
                }
                let children: Vec<ChildRef> = child_node_ids
                    .into_iter()
                    .map(|child_node_id| ChildRef {
                        child_node_id,
                        child_execution_id: Uuid::now_v7(),
                    })
                    .collect();
                let keys = children
                    .iter()
                    .map(|c| c.child_execution_id.to_string())
                    .collect();
                let Some(ne) = self
                    .append_response(
                        ne.uuid,
                        ExecutableResponse::Children {
                            children: children.clone(),
                        },
                    )
                    .await?
                else {
                    return Ok(());
                };
                self.register_resume(&ne, keys).await?;
                for child in &children {
                    self.create_execution(
                        child.child_execution_id,
                        &ne.ambiance,
                        &child.child_node_id,
                        Some(ne.uuid),
                    )
                    .await?;
                }
                for child in &children {
                    self.run_queued(child.child_execution_id).await?;
                }
                Ok(())
            }

            StepOutput::ChildChain {
                next_child_id,
                suspend,
                last_link,
            } => match (next_child_id, suspend) {
                (_, true) => {
                    let Some(ne) = self
                        .append_response(
                            ne.uuid,
                            ExecutableResponse::ChildChain {
                                next_child_id: None,
                                next_child_execution_id: None,
                                suspend: true,
                                last_link,
                            },
                        )
                        .await?
                    else {
                        return Ok(());
                    };
                    tracing::info!(node_execution_id = %ne.uuid, "chain suspended until resumed");
                    self.register_resume(&ne, vec![chain_resume_key(ne.uuid)])
                        .await?;
                    Ok(())
                }
                (Some(child_node_id), false) => {
                    self.node(&child_node_id)?;
                    let child_id = Uuid::now_v7();
                    let Some(ne) = self
                        .append_response(
                            ne.uuid,
                            ExecutableResponse::ChildChain {
                                next_child_id: Some(child_node_id.clone()),
                                next_child_execution_id: Some(child_id),
                                suspend: false,
                                last_link,
                            },
                        )
                        .await?
                    else {
                        return Ok(());
                    };
                    self.register_resume(&ne, vec![child_id.to_string()]).await?;
                    self.start_child(&ne, &child_node_id, child_id).await
                }
                (None, false) => {
                    let err = StepError::InvalidResponse(
                        "chain link names no child and does not suspend".to_string(),
                    );
                    self.conclude(ne, node, err.into()).await
                }
            },
        }
    }

    async fn suspend_on_task(
        &self,
        ne: NodeExecution,
        node: &Arc<PlanNode>,
        response: ExecutableResponse,
        correlation_id: String,
        task: TaskRequest,
    ) -> Result<(), EngineError> {
        let Some(ne) = self.append_response(ne.uuid, response).await? else {
            return Ok(());
        };
        self.register_resume(&ne, vec![correlation_id.clone()])
            .await?;

        tracing::debug!(node_execution_id = %ne.uuid, correlation_id = %correlation_id, task = %task.task_name, "dispatching task");
        if let Err(e) = self
            .dispatcher
            .dispatch(&correlation_id, &ne.ambiance, &task)
            .await
        {
            tracing::warn!(node_execution_id = %ne.uuid, error = %e, "task dispatch failed");
            let current = self.fetch(ne.uuid).await?;
            return self.conclude(current, node, e.into()).await;
        }
        Ok(())
    }

    async fn start_child(
        &self,
        parent: &NodeExecution,
        child_node_id: &str,
        child_id: Uuid,
    ) -> Result<(), EngineError> {
        self.create_execution(child_id, &parent.ambiance, child_node_id, Some(parent.uuid))
            .await?;
        self.run_queued(child_id).await
    }

    // -----------------------------------------------------------------------
    // Concluding
    // -----------------------------------------------------------------------

    /// Record a step result: outcomes first, then advisers when the status is
    /// broke, then the final status.
    async fn conclude(
        &self,
        ne: NodeExecution,
        node: &Arc<PlanNode>,
        result: StepResult,
    ) -> Result<(), EngineError> {
        let StepResult {
            status,
            outcomes,
            failure_info,
        } = result;

        let (status, failure_info) = if status.is_final() {
            (status, failure_info)
        } else {
            tracing::warn!(node_execution_id = %ne.uuid, status = %status, "step finished with non-final status");
            (
                Status::Errored,
                Some(FailureInfo::new(
                    format!("step finished with non-final status {status}"),
                    [FailureType::Unknown],
                )),
            )
        };

        let mut ne = ne;
        for outcome in outcomes {
            ne = self.save_outcome(ne.uuid, outcome).await?;
        }

        if status.is_broke() {
            let event = AdvisingEvent {
                ambiance: ne.ambiance.clone(),
                from_status: ne.status,
                to_status: status,
                adviser_parameters: Vec::new(),
                failure_info: failure_info.clone(),
                previous_adviser_expired: false,
                retry_ids: ne.retry_ids.clone(),
            };
            let advice = match self.advisers.advise(node, &event) {
                Ok(advice) => advice,
                Err(e) => return self.fail_advising(ne.uuid, e).await,
            };
            if let Some(advice) = advice {
                self.events.publish(OrchestrationEvent::NodeAdvised {
                    node_execution_id: ne.uuid,
                    adviser_type: advice.adviser_type.to_string(),
                    response_kind: advice.response.kind().to_string(),
                });
                return self
                    .apply_advice(ne, node, status, failure_info, advice.response)
                    .await;
            }
        }

        self.finish(ne.uuid, status, StatusUpdate::none().with_failure(failure_info))
            .await?;
        Ok(())
    }

    /// Advisers of `id` could not be evaluated: settle it Errored so its
    /// parent still resumes, then surface the fault.
    pub(crate) async fn fail_advising(&self, id: Uuid, err: AdviseError) -> Result<(), EngineError> {
        tracing::error!(node_execution_id = %id, error = %err, "adviser evaluation failed");
        let info = FailureInfo::new(
            format!("adviser evaluation failed: {err}"),
            [FailureType::Unknown],
        );
        self.finish(id, Status::Errored, StatusUpdate::none().with_failure(Some(info)))
            .await?;
        Err(err.into())
    }

    /// Apply an adviser decision to a node that reached `broke_status`.
    pub(crate) async fn apply_advice(
        &self,
        ne: NodeExecution,
        node: &Arc<PlanNode>,
        broke_status: Status,
        failure_info: Option<FailureInfo>,
        response: AdviserResponse,
    ) -> Result<(), EngineError> {
        let update = StatusUpdate::none()
            .with_failure(failure_info)
            .with_adviser_response(response.clone());

        match response {
            AdviserResponse::Retry {
                retry_index,
                wait_interval_secs,
            } => {
                let Some(old) = self.settle(ne.uuid, broke_status, update).await? else {
                    return Ok(());
                };
                let old = self.store.mark_retried(old.uuid).await?;
                let new_id = self.create_retry(&old, node, retry_index).await?;
                tracing::info!(
                    node_execution_id = %old.uuid,
                    retry_execution_id = %new_id,
                    retry_index,
                    wait_interval_secs,
                    "retrying node"
                );
                if wait_interval_secs == 0 {
                    return self.run_queued(new_id).await;
                }
                let Some(engine) = self.weak.upgrade() else {
                    return Ok(());
                };
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(wait_interval_secs)).await;
                    if let Err(e) = engine.run_queued(new_id).await {
                        tracing::error!(node_execution_id = %new_id, error = %e, "delayed retry failed");
                    }
                });
                Ok(())
            }
            AdviserResponse::InterventionWait { timeout_secs, .. } => {
                let deadline = intervention_deadline(timeout_secs);
                let waiting = self
                    .settle(
                        ne.uuid,
                        Status::InterventionWaiting,
                        update.with_deadline(deadline),
                    )
                    .await?;
                if waiting.is_some() {
                    tracing::info!(node_execution_id = %ne.uuid, deadline = %deadline, "waiting for intervention");
                }
                Ok(())
            }
            AdviserResponse::IgnoreFailure => {
                self.finish(ne.uuid, Status::IgnoreFailed, update).await?;
                Ok(())
            }
            AdviserResponse::StepGroupRollback
            | AdviserResponse::StageRollback
            | AdviserResponse::End => {
                self.finish(ne.uuid, broke_status, update).await?;
                Ok(())
            }
        }
    }

    async fn create_retry(
        &self,
        old: &NodeExecution,
        node: &PlanNode,
        retry_index: u32,
    ) -> Result<Uuid, EngineError> {
        let id = Uuid::now_v7();
        let mut level = old
            .ambiance
            .current_level()
            .cloned()
            .ok_or(AmbianceError::InvalidAmbianceState("retried node has no level"))?;
        level.runtime_id = id.to_string();
        level.retry_index = retry_index;
        level.start_ts = Some(Utc::now());

        let mut ne = NodeExecution::new(id, old.ambiance.pop().push(level), node, old.parent_id);
        ne.previous_id = Some(old.uuid);
        ne.retry_ids = old.retry_ids.clone();
        ne.retry_ids.push(old.uuid);
        self.store.save(&ne).await?;

        self.events.publish(OrchestrationEvent::NodeStarted {
            node_execution_id: id,
            node_id: ne.node_id.clone(),
            plan_execution_id: ne.ambiance.plan_execution_id.clone(),
            retry_index,
        });
        Ok(id)
    }

    /// Move a non-final node to `status` and notify its parent when `status` is final.
    pub(crate) async fn finish(
        &self,
        id: Uuid,
        status: Status,
        update: StatusUpdate,
    ) -> Result<Option<NodeExecution>, EngineError> {
        let finished = self.settle(id, status, update).await?;
        if let Some(ne) = &finished {
            tracing::info!(node_execution_id = %id, node = %ne.identifier, status = %status, "node finished");
            if status.is_final() {
                self.notify_parent(ne).await?;
            }
        }
        Ok(finished)
    }

    /// Move a non-final node to `status`; `None` if it already finished.
    pub(crate) async fn settle(
        &self,
        id: Uuid,
        status: Status,
        update: StatusUpdate,
    ) -> Result<Option<NodeExecution>, EngineError> {
        self.transition(id, status, update, |ne| !ne.status.is_final())
            .await
    }

    /// Complete the parent's wait for this node.
    ///
    /// The parent waits under the id of the node's first attempt, so a
    /// retried node still completes it.
    pub(crate) async fn notify_parent(&self, ne: &NodeExecution) -> Result<(), EngineError> {
        if ne.parent_id.is_none() {
            return Ok(());
        }
        let key = ne.retry_ids.first().copied().unwrap_or(ne.uuid).to_string();
        let data = serde_json::to_value(StepResponseNotifyData::from(ne))?;
        tracing::debug!(node_execution_id = %ne.uuid, key = %key, "notifying parent");
        self.waiter.done_with(&key, data).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Store access
    // -----------------------------------------------------------------------

    async fn create_execution(
        &self,
        id: Uuid,
        parent_ambiance: &Ambiance,
        setup_id: &str,
        parent_id: Option<Uuid>,
    ) -> Result<NodeExecution, EngineError> {
        let node = self.node(setup_id)?;
        let level = Level {
            setup_id: node.uuid.clone(),
            runtime_id: id.to_string(),
            identifier: node.identifier.clone(),
            step_type: node.step_type.clone(),
            group: node.group.clone(),
            retry_index: 0,
            start_ts: Some(Utc::now()),
        };
        let ne = NodeExecution::new(id, parent_ambiance.push(level), &node, parent_id);
        self.store.save(&ne).await?;

        tracing::debug!(node_execution_id = %id, node = %ne.identifier, parent_id = ?parent_id, "node queued");
        self.events.publish(OrchestrationEvent::NodeStarted {
            node_execution_id: id,
            node_id: ne.node_id.clone(),
            plan_execution_id: ne.ambiance.plan_execution_id.clone(),
            retry_index: 0,
        });
        Ok(ne)
    }

    pub(crate) async fn fetch(&self, id: Uuid) -> Result<NodeExecution, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or(EngineError::NodeExecutionNotFound(id))
    }

    /// Version-checked status change.
    ///
    /// Re-fetches and re-evaluates `allowed` on every conflict, up to
    /// `max_version_retries` times. `None` when `allowed` rejects the
    /// current record.
    async fn transition<P>(
        &self,
        id: Uuid,
        to: Status,
        update: StatusUpdate,
        allowed: P,
    ) -> Result<Option<NodeExecution>, EngineError>
    where
        P: Fn(&NodeExecution) -> bool + Send + Sync,
    {
        let attempts = self.config.max_version_retries + 1;
        for attempt in 1..=attempts {
            let current = self.fetch(id).await?;
            if !allowed(&current) {
                return Ok(None);
            }
            match self
                .store
                .update_status_with_version_check(id, current.version, to, update.clone())
                .await
            {
                Ok(updated) => {
                    self.events.publish(OrchestrationEvent::NodeStatusChanged {
                        node_execution_id: id,
                        from: current.status,
                        to,
                    });
                    return Ok(Some(updated));
                }
                Err(e) if e.is_concurrent_modification() => {
                    tracing::debug!(node_execution_id = %id, attempt, "version conflict, re-evaluating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Transient { id, attempts })
    }

    /// Version-checked append of `response` to a Running node.
    ///
    /// `None` when the node stopped running, e.g. it was aborted while its
    /// step was executing. Nothing is written in that case.
    async fn append_response(
        &self,
        id: Uuid,
        response: ExecutableResponse,
    ) -> Result<Option<NodeExecution>, EngineError> {
        let attempts = self.config.max_version_retries + 1;
        for _ in 0..attempts {
            let current = self.fetch(id).await?;
            if current.status != Status::Running {
                tracing::info!(node_execution_id = %id, status = %current.status, "node no longer running, response dropped");
                return Ok(None);
            }
            match self
                .store
                .append_executable_response(id, current.version, response.clone())
                .await
            {
                Ok(updated) => {
                    if updated.status != current.status {
                        self.events.publish(OrchestrationEvent::NodeStatusChanged {
                            node_execution_id: id,
                            from: current.status,
                            to: updated.status,
                        });
                    }
                    if updated.status.is_waiting() {
                        self.events.publish(OrchestrationEvent::NodeSuspended {
                            node_execution_id: id,
                            mode: response.mode(),
                        });
                    }
                    return Ok(Some(updated));
                }
                Err(e) if e.is_concurrent_modification() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Transient { id, attempts })
    }

    async fn save_outcome(&self, id: Uuid, outcome: Outcome) -> Result<NodeExecution, EngineError> {
        let attempts = self.config.max_version_retries + 1;
        for _ in 0..attempts {
            let current = self.fetch(id).await?;
            match self
                .store
                .save_outcome(id, current.version, outcome.clone())
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_concurrent_modification() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Transient { id, attempts })
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub(crate) fn node(&self, setup_id: &str) -> Result<Arc<PlanNode>, EngineError> {
        self.plan
            .get_node(setup_id)
            .ok_or_else(|| EngineError::NodeNotFound(setup_id.to_string()))
    }

    fn step_for(&self, ne: &NodeExecution) -> Result<&BoxStep, EngineError> {
        self.steps
            .get(&ne.step_type.type_name)
            .ok_or_else(|| EngineError::UnknownStepType(ne.step_type.type_name.clone()))
    }

    fn step_context(
        &self,
        ne: &NodeExecution,
        node: Arc<PlanNode>,
    ) -> Result<StepContext, EngineError> {
        let parameters = if node.step_parameters.is_empty() {
            serde_json::Value::Null
        } else {
            decode_parameters(self.codec.as_ref(), &node.step_parameters)?
        };
        Ok(StepContext {
            node_execution_id: ne.uuid,
            ambiance: ne.ambiance.clone(),
            node,
            parameters,
            executable_responses: ne.executable_responses.clone(),
        })
    }

    async fn register_resume(
        &self,
        ne: &NodeExecution,
        keys: Vec<String>,
    ) -> Result<(), EngineError> {
        let callback = ResumeCallback::for_node(self.weak.clone(), ne.uuid);
        let wait_id = self
            .waiter
            .register_callback(keys, BoxNotifyCallback::new(callback))
            .await?;
        tracing::debug!(node_execution_id = %ne.uuid, wait_id = %wait_id, "resume registered");
        Ok(())
    }
}

/// Deadline `timeout_secs` from now, saturating at the latest representable instant.
fn intervention_deadline(timeout_secs: u64) -> DateTime<Utc> {
    i64::try_from(timeout_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|timeout| Utc::now().checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn first_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    ids.iter().map(String::as_str).find(|id| !seen.insert(*id))
}

/// Correlation keys the node's current wait registration listens on.
pub(crate) fn wait_keys(ne: &NodeExecution) -> Vec<String> {
    match ne.obtain_latest_executable_response() {
        Some(ExecutableResponse::Task {
            correlation_ids, ..
        }) => correlation_ids.clone(),
        Some(ExecutableResponse::TaskChain { correlation_id, .. }) => {
            vec![correlation_id.clone()]
        }
        Some(ExecutableResponse::Child {
            child_execution_id, ..
        }) => vec![child_execution_id.to_string()],
        Some(ExecutableResponse::Children { children }) => children
            .iter()
            .map(|c| c.child_execution_id.to_string())
            .collect(),
        Some(ExecutableResponse::ChildChain { suspend: true, .. }) => {
            vec![chain_resume_key(ne.uuid)]
        }
        Some(ExecutableResponse::ChildChain {
            next_child_execution_id: Some(child_id),
            ..
        }) => vec![child_id.to_string()],
        _ => Vec::new(),
    }
}

/// First response in `responses` that decodes as an error payload.
fn decode_error_payload(responses: &ResponseMap) -> Option<FailureInfo> {
    responses
        .values()
        .find_map(|v| serde_json::from_value::<ErrorNotifyData>(v.clone()).ok())
        .map(FailureInfo::from)
}
