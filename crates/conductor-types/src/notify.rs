//! Payloads delivered through the wait/notify subsystem.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advise::AdviserResponse;
use crate::execution::{FailureInfo, FailureType, NodeExecution, Status, StepOutcomeRef};

/// One delivered response payload.
pub type ResponseData = serde_json::Value;

/// Correlation id (or child setup uuid, after accumulation) to payload.
pub type ResponseMap = BTreeMap<String, ResponseData>;

/// Summary of a finished child execution, delivered to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponseNotifyData {
    pub node_uuid: String,
    pub node_execution_id: Uuid,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub outcome_refs: Vec<StepOutcomeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
}

impl From<&NodeExecution> for StepResponseNotifyData {
    fn from(ne: &NodeExecution) -> Self {
        Self {
            node_uuid: ne.node_id.clone(),
            node_execution_id: ne.uuid,
            identifier: ne.identifier.clone(),
            group: ne.group.clone(),
            status: ne.status,
            failure_info: ne.failure_info.clone(),
            outcome_refs: ne.outcome_refs(),
            adviser_response: ne.adviser_response.clone(),
        }
    }
}

/// Payload of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotifyData {
    pub error_message: String,
    #[serde(default)]
    pub failure_types: Vec<FailureType>,
}

impl From<ErrorNotifyData> for FailureInfo {
    fn from(data: ErrorNotifyData) -> Self {
        FailureInfo::new(data.error_message, data.failure_types)
    }
}
