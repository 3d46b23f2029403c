//! Runtime execution types: status machine, execution modes, executable
//! responses, outcomes, failure info and the `NodeExecution` record itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advise::AdviserResponse;
use crate::ambiance::{Ambiance, StepType};
use crate::plan::PlanNode;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    Running,
    /// Waiting on children or an external chain resume.
    AsyncWaiting,
    /// Waiting on a dispatched task response.
    TaskWaiting,
    /// Parked by an adviser until a human acts or the deadline expires.
    InterventionWaiting,
    Paused,
    Discontinuing,
    Succeeded,
    Failed,
    Errored,
    Expired,
    Aborted,
    Skipped,
    IgnoreFailed,
}

impl Status {
    /// Terminal statuses. A final node is never advanced again.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Status::Succeeded
                | Status::Failed
                | Status::Errored
                | Status::Expired
                | Status::Aborted
                | Status::Skipped
                | Status::IgnoreFailed
        )
    }

    /// Failure-class statuses eligible for adviser intervention.
    pub fn is_broke(self) -> bool {
        matches!(self, Status::Failed | Status::Errored | Status::Expired)
    }

    pub fn is_positive(self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Skipped | Status::IgnoreFailed
        )
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            Status::AsyncWaiting | Status::TaskWaiting | Status::InterventionWaiting | Status::Paused
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::AsyncWaiting => "async_waiting",
            Status::TaskWaiting => "task_waiting",
            Status::InterventionWaiting => "intervention_waiting",
            Status::Paused => "paused",
            Status::Discontinuing => "discontinuing",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Errored => "errored",
            Status::Expired => "expired",
            Status::Aborted => "aborted",
            Status::Skipped => "skipped",
            Status::IgnoreFailed => "ignore_failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode / ExecutableResponse
// ---------------------------------------------------------------------------

/// How a node is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Task,
    Sync,
    Child,
    Children,
    ChildChain,
    TaskChain,
}

/// A started child: its plan node and the execution created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    pub child_node_id: String,
    pub child_execution_id: Uuid,
}

/// A node's declaration of what it is waiting on. Appended to the
/// `NodeExecution` every time the node suspends; the last one is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableResponse {
    Sync {},
    Task {
        correlation_ids: Vec<String>,
        task_name: String,
    },
    TaskChain {
        correlation_id: String,
        task_name: String,
        chain_end: bool,
    },
    Child {
        child_node_id: String,
        child_execution_id: Uuid,
    },
    Children {
        children: Vec<ChildRef>,
    },
    ChildChain {
        /// Child to run next. `None` when the link only suspends or finishes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_child_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_child_execution_id: Option<Uuid>,
        /// `true` parks the parent until an external resume arrives.
        suspend: bool,
        last_link: bool,
    },
}

impl ExecutableResponse {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ExecutableResponse::Sync {} => ExecutionMode::Sync,
            ExecutableResponse::Task { .. } => ExecutionMode::Task,
            ExecutableResponse::TaskChain { .. } => ExecutionMode::TaskChain,
            ExecutableResponse::Child { .. } => ExecutionMode::Child,
            ExecutableResponse::Children { .. } => ExecutionMode::Children,
            ExecutableResponse::ChildChain { .. } => ExecutionMode::ChildChain,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes and failures
// ---------------------------------------------------------------------------

/// Named, typed result blob attached to a node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    /// Type tag for consumers that need to decode `data`.
    pub kind: String,
    pub data: serde_json::Value,
}

impl Outcome {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            data,
        }
    }
}

/// Reference to an outcome of a specific node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcomeRef {
    pub name: String,
    pub instance_id: Uuid,
}

/// Classification of a step failure, used to match advisers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Unknown,
    Application,
    Authentication,
    Authorization,
    Connectivity,
    Timeout,
    Verification,
    DelegateProvisioning,
    PolicyEvaluation,
    InputTimeout,
    ApprovalRejection,
    UserMarkedFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub error_message: String,
    #[serde(default)]
    pub failure_types: BTreeSet<FailureType>,
}

impl FailureInfo {
    pub fn new(
        error_message: impl Into<String>,
        failure_types: impl IntoIterator<Item = FailureType>,
    ) -> Self {
        Self {
            error_message: error_message.into(),
            failure_types: failure_types.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeExecution
// ---------------------------------------------------------------------------

/// Runtime instance of a plan node.
///
/// Mutated only through the store's version-checked update API; `version`
/// increases by one on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: Uuid,
    pub ambiance: Ambiance,
    /// Plan node uuid (setup id).
    pub node_id: String,
    pub identifier: String,
    pub name: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub executable_responses: Vec<ExecutableResponse>,
    #[serde(default)]
    pub outcomes: BTreeMap<String, Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// The execution this one retries, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<Uuid>,
    /// Ids of all earlier attempts of this node, oldest first.
    #[serde(default)]
    pub retry_ids: Vec<Uuid>,
    /// Set once a newer attempt replaces this execution.
    #[serde(default)]
    pub old_retry: bool,
    pub start_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention_deadline: Option<DateTime<Utc>>,
    pub version: u64,
}

impl NodeExecution {
    /// Build a fresh `Queued` execution of `node` under `ambiance`.
    ///
    /// `ambiance` must already carry the level for this execution.
    pub fn new(uuid: Uuid, ambiance: Ambiance, node: &PlanNode, parent_id: Option<Uuid>) -> Self {
        Self {
            uuid,
            ambiance,
            node_id: node.uuid.clone(),
            identifier: node.identifier.clone(),
            name: node.name.clone(),
            step_type: node.step_type.clone(),
            group: node.group.clone(),
            status: Status::Queued,
            mode: None,
            executable_responses: Vec::new(),
            outcomes: BTreeMap::new(),
            failure_info: None,
            adviser_response: None,
            parent_id,
            previous_id: None,
            retry_ids: Vec::new(),
            old_retry: false,
            start_ts: Utc::now(),
            end_ts: None,
            intervention_deadline: None,
            version: 0,
        }
    }

    pub fn obtain_latest_executable_response(&self) -> Option<&ExecutableResponse> {
        self.executable_responses.last()
    }

    /// Whether a resume must synthesize its input from the children's
    /// persisted state instead of using the delivered payload.
    ///
    /// Only the latest response is inspected for CHILD_CHAIN.
    pub fn requires_accumulation(&self) -> bool {
        let Some(latest) = self.obtain_latest_executable_response() else {
            return false;
        };
        match self.mode {
            Some(ExecutionMode::Child) | Some(ExecutionMode::Children) => true,
            Some(ExecutionMode::ChildChain) => {
                matches!(latest, ExecutableResponse::ChildChain { suspend: true, .. })
            }
            _ => false,
        }
    }

    pub fn outcome_refs(&self) -> Vec<StepOutcomeRef> {
        self.outcomes
            .keys()
            .map(|name| StepOutcomeRef {
                name: name.clone(),
                instance_id: self.uuid,
            })
            .collect()
    }

    /// Active means "not replaced by a retry".
    pub fn is_active(&self) -> bool {
        !self.old_retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::StepCategory;

    fn sample_node() -> PlanNode {
        PlanNode {
            uuid: "node-1".to_string(),
            identifier: "deploy".to_string(),
            name: "Deploy".to_string(),
            step_type: StepType::new("SECTION", StepCategory::Stage),
            group: Some("STAGE".to_string()),
            step_parameters: Vec::new(),
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
        }
    }

    fn sample_execution() -> NodeExecution {
        NodeExecution::new(Uuid::now_v7(), Ambiance::new("exec", "plan"), &sample_node(), None)
    }

    #[test]
    fn status_classification() {
        assert!(Status::Failed.is_broke());
        assert!(Status::Expired.is_broke());
        assert!(!Status::Aborted.is_broke());
        assert!(Status::Aborted.is_final());
        assert!(!Status::InterventionWaiting.is_final());
        assert!(Status::IgnoreFailed.is_positive());
        assert!(Status::TaskWaiting.is_waiting());
    }

    #[test]
    fn new_execution_is_queued_at_version_zero() {
        let ne = sample_execution();
        assert_eq!(ne.status, Status::Queued);
        assert_eq!(ne.version, 0);
        assert_eq!(ne.node_id, "node-1");
        assert!(ne.is_active());
    }

    #[test]
    fn accumulation_never_required_without_responses() {
        let mut ne = sample_execution();
        ne.mode = Some(ExecutionMode::Child);
        assert!(!ne.requires_accumulation());
    }

    #[test]
    fn accumulation_required_for_child_mode() {
        let mut ne = sample_execution();
        ne.mode = Some(ExecutionMode::Child);
        ne.executable_responses.push(ExecutableResponse::Child {
            child_node_id: "c".to_string(),
            child_execution_id: Uuid::now_v7(),
        });
        assert!(ne.requires_accumulation());
    }

    #[test]
    fn accumulation_for_child_chain_follows_latest_suspend_flag() {
        let mut ne = sample_execution();
        ne.mode = Some(ExecutionMode::ChildChain);
        ne.executable_responses.push(ExecutableResponse::ChildChain {
            next_child_id: Some("a".to_string()),
            next_child_execution_id: None,
            suspend: true,
            last_link: false,
        });
        assert!(ne.requires_accumulation());

        ne.executable_responses.push(ExecutableResponse::ChildChain {
            next_child_id: Some("b".to_string()),
            next_child_execution_id: None,
            suspend: false,
            last_link: true,
        });
        assert!(!ne.requires_accumulation());
    }

    #[test]
    fn accumulation_not_required_for_task_mode() {
        let mut ne = sample_execution();
        ne.mode = Some(ExecutionMode::Task);
        ne.executable_responses.push(ExecutableResponse::Task {
            correlation_ids: vec!["corr".to_string()],
            task_name: "shell".to_string(),
        });
        assert!(!ne.requires_accumulation());
    }

    #[test]
    fn outcome_refs_point_at_this_instance() {
        let mut ne = sample_execution();
        ne.outcomes.insert(
            "result".to_string(),
            Outcome::new("result", "json", serde_json::json!("ok")),
        );
        let refs = ne.outcome_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "result");
        assert_eq!(refs[0].instance_id, ne.uuid);
    }

    #[test]
    fn executable_response_mode_mapping() {
        let resp = ExecutableResponse::Children { children: vec![] };
        assert_eq!(resp.mode(), ExecutionMode::Children);
        assert_eq!(ExecutableResponse::Sync {}.mode(), ExecutionMode::Sync);
    }
}
