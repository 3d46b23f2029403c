//! NodeExecution store trait definition.
//!
//! Defines the storage interface for node executions. Every mutation is
//! conditional on the caller's `expected_version`; a mismatch fails with
//! `RepositoryError::ConcurrentModification` and writes nothing. The
//! infrastructure layer (conductor-infra) implements this trait with SQLite;
//! `InMemoryNodeExecutionStore` in this crate backs tests and ephemeral runs.

use chrono::{DateTime, Utc};
use conductor_types::advise::AdviserResponse;
use conductor_types::error::RepositoryError;
use conductor_types::execution::{
    ExecutableResponse, FailureInfo, NodeExecution, Outcome, Status,
};
use uuid::Uuid;

/// Optional field changes applied together with a status transition.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub failure_info: Option<FailureInfo>,
    pub adviser_response: Option<AdviserResponse>,
    pub intervention_deadline: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, failure_info: Option<FailureInfo>) -> Self {
        if failure_info.is_some() {
            self.failure_info = failure_info;
        }
        self
    }

    pub fn with_adviser_response(mut self, response: AdviserResponse) -> Self {
        self.adviser_response = Some(response);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.intervention_deadline = Some(deadline);
        self
    }
}

/// Repository trait for node execution persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait NodeExecutionStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the id already exists.
    fn save(
        &self,
        ne: &NodeExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Move to `new_status` and apply `update`, iff the stored version equals
    /// `expected_version`. Final statuses stamp `end_ts`. Returns the stored
    /// record after the write.
    fn update_status_with_version_check(
        &self,
        id: Uuid,
        expected_version: u64,
        new_status: Status,
        update: StatusUpdate,
    ) -> impl std::future::Future<Output = Result<NodeExecution, RepositoryError>> + Send;

    /// Append `response`, record its mode and move to the matching waiting
    /// status (see [`apply_executable_response`]).
    fn append_executable_response(
        &self,
        id: Uuid,
        expected_version: u64,
        response: ExecutableResponse,
    ) -> impl std::future::Future<Output = Result<NodeExecution, RepositoryError>> + Send;

    fn save_outcome(
        &self,
        id: Uuid,
        expected_version: u64,
        outcome: Outcome,
    ) -> impl std::future::Future<Output = Result<NodeExecution, RepositoryError>> + Send;

    /// Children of `parent_id`, oldest first. `only_active` skips records
    /// replaced by a retry.
    fn list_children(
        &self,
        parent_id: Uuid,
        only_active: bool,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;

    /// Flag a record as replaced by a newer attempt.
    fn mark_retried(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<NodeExecution, RepositoryError>> + Send;

    /// All records of one plan execution, oldest first.
    fn list_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// Shared mutation rules
// ---------------------------------------------------------------------------

/// Fail unless the stored version matches.
pub fn check_version(ne: &NodeExecution, expected_version: u64) -> Result<(), RepositoryError> {
    if ne.version != expected_version {
        return Err(RepositoryError::ConcurrentModification {
            id: ne.uuid,
            expected: expected_version,
            actual: ne.version,
        });
    }
    Ok(())
}

/// Apply a status transition in place. Does not bump the version.
pub fn apply_status_update(ne: &mut NodeExecution, new_status: Status, update: StatusUpdate) {
    ne.status = new_status;
    if let Some(info) = update.failure_info {
        ne.failure_info = Some(info);
    }
    if let Some(resp) = update.adviser_response {
        ne.adviser_response = Some(resp);
    }
    if let Some(deadline) = update.intervention_deadline {
        ne.intervention_deadline = Some(deadline);
    }
    if new_status.is_final() && ne.end_ts.is_none() {
        ne.end_ts = Some(Utc::now());
    }
}

/// Append an executable response in place. Does not bump the version.
///
/// Task and task-chain responses move the node to `TaskWaiting`; child,
/// children and child-chain responses to `AsyncWaiting`. A sync response
/// only records the mode. A final status is never changed.
pub fn apply_executable_response(ne: &mut NodeExecution, response: ExecutableResponse) {
    ne.mode = Some(response.mode());
    if ne.status.is_final() {
        ne.executable_responses.push(response);
        return;
    }
    match &response {
        ExecutableResponse::Task { .. } | ExecutableResponse::TaskChain { .. } => {
            ne.status = Status::TaskWaiting;
        }
        ExecutableResponse::Child { .. }
        | ExecutableResponse::Children { .. }
        | ExecutableResponse::ChildChain { .. } => {
            ne.status = Status::AsyncWaiting;
        }
        ExecutableResponse::Sync {} => {}
    }
    ne.executable_responses.push(response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::ambiance::{Ambiance, StepCategory, StepType};
    use conductor_types::execution::ExecutionMode;
    use conductor_types::plan::PlanNode;

    fn sample() -> NodeExecution {
        let node = PlanNode {
            uuid: "n".to_string(),
            identifier: "n".to_string(),
            name: "n".to_string(),
            step_type: StepType::new("SECTION", StepCategory::Step),
            group: None,
            step_parameters: Vec::new(),
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
        };
        NodeExecution::new(Uuid::now_v7(), Ambiance::new("e", "p"), &node, None)
    }

    #[test]
    fn final_status_stamps_end_ts() {
        let mut ne = sample();
        apply_status_update(&mut ne, Status::Running, StatusUpdate::none());
        assert!(ne.end_ts.is_none());
        apply_status_update(
            &mut ne,
            Status::Failed,
            StatusUpdate::none().with_failure(Some(FailureInfo::new("x", []))),
        );
        assert!(ne.end_ts.is_some());
        assert_eq!(ne.failure_info.as_ref().unwrap().error_message, "x");
    }

    #[test]
    fn none_fields_leave_stored_values() {
        let mut ne = sample();
        ne.failure_info = Some(FailureInfo::new("kept", []));
        apply_status_update(&mut ne, Status::Running, StatusUpdate::none().with_failure(None));
        assert_eq!(ne.failure_info.unwrap().error_message, "kept");
    }

    #[test]
    fn task_response_moves_to_task_waiting() {
        let mut ne = sample();
        apply_executable_response(
            &mut ne,
            ExecutableResponse::Task {
                correlation_ids: vec!["c".to_string()],
                task_name: "shell".to_string(),
            },
        );
        assert_eq!(ne.status, Status::TaskWaiting);
        assert_eq!(ne.mode, Some(ExecutionMode::Task));
        assert_eq!(ne.executable_responses.len(), 1);
    }

    #[test]
    fn response_does_not_revive_final_node() {
        let mut ne = sample();
        ne.status = Status::Aborted;
        apply_executable_response(
            &mut ne,
            ExecutableResponse::Children {
                children: Vec::new(),
            },
        );
        assert_eq!(ne.status, Status::Aborted);
        assert_eq!(ne.executable_responses.len(), 1);
    }

    #[test]
    fn version_mismatch_reports_both_versions() {
        let mut ne = sample();
        ne.version = 4;
        let err = check_version(&ne, 3).unwrap_err();
        match err {
            RepositoryError::ConcurrentModification {
                expected, actual, ..
            } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
