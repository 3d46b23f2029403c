//! Operations driven from outside the node lifecycle: intervention expiry,
//! manual repair actions, abort and bulk error-out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::advise::{AdviserResponse, AdvisingEvent, RepairActionCode};
use conductor_types::event::OrchestrationEvent;
use conductor_types::execution::{FailureInfo, FailureType, NodeExecution, Status};
use conductor_types::plan::PlanNode;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use super::{EngineError, OrchestrationEngine, wait_keys};
use crate::repository::node_execution::{NodeExecutionStore, StatusUpdate};
use crate::waiter::Waiter;

impl<S, W> OrchestrationEngine<S, W>
where
    S: NodeExecutionStore + 'static,
    W: Waiter + 'static,
{
    /// The intervention deadline of `id` passed.
    ///
    /// Advisers are consulted for InterventionWaiting -> Expired with
    /// `previous_adviser_expired` set. When none advises, the repair action
    /// recorded with the intervention wait applies. Nodes not waiting for
    /// intervention are left alone.
    pub async fn handle_intervention_expiry(&self, id: Uuid) -> Result<(), EngineError> {
        let current = self.fetch(id).await?;
        if current.status != Status::InterventionWaiting {
            tracing::debug!(node_execution_id = %id, status = %current.status, "not waiting for intervention, expiry ignored");
            return Ok(());
        }
        let node = self.node(&current.node_id)?;

        let event = AdvisingEvent {
            ambiance: current.ambiance.clone(),
            from_status: Status::InterventionWaiting,
            to_status: Status::Expired,
            adviser_parameters: Vec::new(),
            failure_info: current.failure_info.clone(),
            previous_adviser_expired: true,
            retry_ids: current.retry_ids.clone(),
        };
        let advice = match self.advisers.advise(&node, &event) {
            Ok(advice) => advice,
            Err(e) => return self.fail_advising(id, e).await,
        };
        if let Some(advice) = advice {
            self.events.publish(OrchestrationEvent::NodeAdvised {
                node_execution_id: id,
                adviser_type: advice.adviser_type.to_string(),
                response_kind: advice.response.kind().to_string(),
            });
            return self
                .apply_advice(current, &node, Status::Expired, None, advice.response)
                .await;
        }

        let code = match &current.adviser_response {
            Some(AdviserResponse::InterventionWait {
                repair_action_code, ..
            }) => *repair_action_code,
            _ => RepairActionCode::Unknown,
        };
        tracing::info!(node_execution_id = %id, repair_action = %code, "intervention expired");
        self.apply_repair(current, &node, code, Status::Expired)
            .await
    }

    /// A human resolved the intervention on `id` with `code`.
    ///
    /// Actions without a success or retry meaning leave the node Failed.
    pub async fn apply_repair_action(
        &self,
        id: Uuid,
        code: RepairActionCode,
    ) -> Result<(), EngineError> {
        let current = self.fetch(id).await?;
        if current.status != Status::InterventionWaiting {
            return Err(EngineError::NotInterventionWaiting {
                id,
                status: current.status,
            });
        }
        if code == RepairActionCode::ManualIntervention {
            return Err(EngineError::InvalidRepairAction(code));
        }
        let node = self.node(&current.node_id)?;
        tracing::info!(node_execution_id = %id, repair_action = %code, "applying repair action");
        self.apply_repair(current, &node, code, Status::Failed)
            .await
    }

    /// Expire every intervention of the plan execution whose deadline is at
    /// or before `now`. Returns how many were expired.
    pub async fn expire_due_interventions(
        &self,
        plan_execution_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let due: Vec<Uuid> = self
            .store
            .list_by_plan_execution(plan_execution_id)
            .await?
            .into_iter()
            .filter(|ne| ne.status == Status::InterventionWaiting)
            .filter(|ne| ne.intervention_deadline.is_some_and(|d| d <= now))
            .map(|ne| ne.uuid)
            .collect();

        for id in &due {
            self.handle_intervention_expiry(*id).await?;
        }
        Ok(due.len())
    }

    async fn apply_repair(
        &self,
        ne: NodeExecution,
        node: &Arc<PlanNode>,
        code: RepairActionCode,
        fallback: Status,
    ) -> Result<(), EngineError> {
        match code {
            RepairActionCode::MarkAsSuccess => {
                self.finish(ne.uuid, Status::Succeeded, StatusUpdate::none())
                    .await?;
                Ok(())
            }
            RepairActionCode::Ignore => {
                self.finish(ne.uuid, Status::IgnoreFailed, StatusUpdate::none())
                    .await?;
                Ok(())
            }
            RepairActionCode::Retry => {
                let retry_index = ne.ambiance.current_retry_index() + 1;
                let response = AdviserResponse::Retry {
                    retry_index,
                    wait_interval_secs: 0,
                };
                self.apply_advice(ne, node, fallback, None, response).await
            }
            RepairActionCode::StageRollback => {
                self.apply_advice(ne, node, fallback, None, AdviserResponse::StageRollback)
                    .await
            }
            RepairActionCode::StepGroupRollback => {
                self.apply_advice(ne, node, fallback, None, AdviserResponse::StepGroupRollback)
                    .await
            }
            _ => {
                self.finish(ne.uuid, fallback, StatusUpdate::none()).await?;
                Ok(())
            }
        }
    }

    /// Abort `id` and, depth first, every non-final active child below it.
    ///
    /// Only `id` itself notifies its parent. Wait registrations of aborted
    /// nodes are cancelled. Returns whether `id` changed.
    pub async fn abort(&self, id: Uuid) -> Result<bool, EngineError> {
        self.abort_tree(id, true).await
    }

    fn abort_tree(&self, id: Uuid, notify: bool) -> BoxFuture<'_, Result<bool, EngineError>> {
        Box::pin(async move {
            for child in self.store.list_children(id, true).await? {
                if !child.status.is_final() {
                    self.abort_tree(child.uuid, false).await?;
                }
            }

            let Some(aborted) = self.settle(id, Status::Aborted, StatusUpdate::none()).await?
            else {
                tracing::debug!(node_execution_id = %id, "already final, abort ignored");
                return Ok(false);
            };
            tracing::info!(node_execution_id = %id, node = %aborted.identifier, "node aborted");
            self.release_wait(&aborted).await;
            if notify {
                self.notify_parent(&aborted).await?;
            }
            Ok(true)
        })
    }

    /// Move every non-final node of the plan execution to Errored without
    /// resuming anything, cancelling their wait registrations. Returns how
    /// many nodes changed.
    pub async fn error_out_active_nodes(
        &self,
        plan_execution_id: &str,
    ) -> Result<usize, EngineError> {
        let active: Vec<Uuid> = self
            .store
            .list_by_plan_execution(plan_execution_id)
            .await?
            .into_iter()
            .filter(|ne| !ne.status.is_final())
            .map(|ne| ne.uuid)
            .collect();

        let mut errored = 0;
        for id in active {
            let update = StatusUpdate::none().with_failure(Some(FailureInfo::new(
                "plan execution errored out",
                [FailureType::Unknown],
            )));
            if let Some(ne) = self.settle(id, Status::Errored, update).await? {
                self.release_wait(&ne).await;
                errored += 1;
            }
        }
        tracing::info!(plan_execution_id = %plan_execution_id, errored, "errored out active nodes");
        Ok(errored)
    }

    async fn release_wait(&self, ne: &NodeExecution) {
        let keys = wait_keys(ne);
        if keys.is_empty() {
            return;
        }
        let cancelled = self.waiter.cancel_keys(&keys).await;
        tracing::debug!(node_execution_id = %ne.uuid, cancelled, "released wait registration");
    }
}
