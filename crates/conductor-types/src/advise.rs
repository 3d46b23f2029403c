//! Adviser inputs and outputs.
//!
//! `AdvisingEvent` is built fresh every time a broke node is evaluated and is
//! never persisted. `AdviserResponse` is the closed set of recovery decisions;
//! the engine applies them. The `*Parameters` structs are the typed form of the
//! codec-encoded bytes stored on each `AdviserObtainment`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ambiance::Ambiance;
use crate::execution::{FailureInfo, FailureType, Status};

/// Metadata key carrying the rollback strategy on an `InterventionWait`.
pub const ROLLBACK_METADATA_KEY: &str = "ROLLBACK";

/// Default manual-intervention timeout: 24 hours.
pub const DEFAULT_INTERVENTION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Repair actions
// ---------------------------------------------------------------------------

/// Action applied when an intervention wait ends or retries are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairActionCode {
    #[default]
    Unknown,
    ManualIntervention,
    Ignore,
    Retry,
    OnFail,
    StageRollback,
    StepGroupRollback,
    CustomFailure,
    MarkAsSuccess,
    EndExecution,
}

impl RepairActionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairActionCode::Unknown => "UNKNOWN",
            RepairActionCode::ManualIntervention => "MANUAL_INTERVENTION",
            RepairActionCode::Ignore => "IGNORE",
            RepairActionCode::Retry => "RETRY",
            RepairActionCode::OnFail => "ON_FAIL",
            RepairActionCode::StageRollback => "STAGE_ROLLBACK",
            RepairActionCode::StepGroupRollback => "STEP_GROUP_ROLLBACK",
            RepairActionCode::CustomFailure => "CUSTOM_FAILURE",
            RepairActionCode::MarkAsSuccess => "MARK_AS_SUCCESS",
            RepairActionCode::EndExecution => "END_EXECUTION",
        }
    }
}

impl fmt::Display for RepairActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AdviserResponse
// ---------------------------------------------------------------------------

/// A recovery decision produced by an adviser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdviserResponse {
    Retry {
        /// Retry index the next attempt will carry.
        retry_index: u32,
        wait_interval_secs: u64,
    },
    InterventionWait {
        timeout_secs: u64,
        repair_action_code: RepairActionCode,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    StepGroupRollback,
    StageRollback,
    IgnoreFailure,
    End,
}

impl AdviserResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            AdviserResponse::Retry { .. } => "retry",
            AdviserResponse::InterventionWait { .. } => "intervention_wait",
            AdviserResponse::StepGroupRollback => "step_group_rollback",
            AdviserResponse::StageRollback => "stage_rollback",
            AdviserResponse::IgnoreFailure => "ignore_failure",
            AdviserResponse::End => "end",
        }
    }
}

// ---------------------------------------------------------------------------
// AdvisingEvent
// ---------------------------------------------------------------------------

/// Input to one adviser evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisingEvent {
    pub ambiance: Ambiance,
    pub from_status: Status,
    pub to_status: Status,
    /// Codec-encoded parameters of the adviser being consulted.
    pub adviser_parameters: Vec<u8>,
    pub failure_info: Option<FailureInfo>,
    /// Set when this evaluation follows an expired intervention wait.
    pub previous_adviser_expired: bool,
    pub retry_ids: Vec<Uuid>,
}

impl AdvisingEvent {
    /// Failure types carried by the event; empty when there is no failure info.
    pub fn failure_types(&self) -> BTreeSet<FailureType> {
        self.failure_info
            .as_ref()
            .map(|f| f.failure_types.clone())
            .unwrap_or_default()
    }

    /// Failure-type filter shared by every adviser.
    ///
    /// An event without failure types is not filtered. Otherwise at least one
    /// of the event's types must be in `applicable`.
    pub fn matches_failure_types(&self, applicable: &BTreeSet<FailureType>) -> bool {
        let Some(info) = self.failure_info.as_ref() else {
            return true;
        };
        if info.failure_types.is_empty() {
            return true;
        }
        info.failure_types.iter().any(|t| applicable.contains(t))
    }
}

// ---------------------------------------------------------------------------
// Adviser parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAdviserParameters {
    #[serde(default)]
    pub applicable_failure_types: BTreeSet<FailureType>,
    pub retry_count: u32,
    /// Wait before each retry; the last entry repeats once exhausted.
    #[serde(default)]
    pub wait_intervals_secs: Vec<u64>,
    #[serde(default)]
    pub repair_action_code_after_retry: RepairActionCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualInterventionParameters {
    #[serde(default)]
    pub applicable_failure_types: BTreeSet<FailureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Applied when the intervention wait expires.
    #[serde(default)]
    pub timeout_action: RepairActionCode,
}

/// Parameters shared by advisers that only filter on failure type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureTypeParameters {
    #[serde(default)]
    pub applicable_failure_types: BTreeSet<FailureType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackStrategy {
    StageRollback,
    StepGroupRollback,
}

impl RollbackStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RollbackStrategy::StageRollback => "STAGE_ROLLBACK",
            RollbackStrategy::StepGroupRollback => "STEP_GROUP_ROLLBACK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackParameters {
    #[serde(default)]
    pub applicable_failure_types: BTreeSet<FailureType>,
    pub strategy: RollbackStrategy,
}
