//! Static plan node definitions.
//!
//! A `PlanNode` is created at plan-compile time and is read-only while the
//! plan executes. Adviser and step parameters are kept as opaque codec bytes;
//! only the component that owns them decodes them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ambiance::StepType;
use crate::execution::ExecutionMode;

/// Name of an adviser implementation, used as the adviser registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdviserType(pub String);

impl AdviserType {
    pub const RETRY: &'static str = "RETRY";
    pub const MANUAL_INTERVENTION: &'static str = "MANUAL_INTERVENTION";
    pub const MANUAL_INTERVENTION_WITH_ROLLBACK: &'static str = "MANUAL_INTERVENTION_WITH_ROLLBACK";
    pub const IGNORE: &'static str = "IGNORE";
    pub const ABORT: &'static str = "ABORT";
    pub const ROLLBACK: &'static str = "ROLLBACK";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdviserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An adviser attached to a node, with its encoded parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    pub adviser_type: AdviserType,
    /// Codec-encoded adviser parameters.
    #[serde(default)]
    pub parameters: Vec<u8>,
}

/// Execution-mode hint attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
    pub mode_hint: ExecutionMode,
}

/// A static node of a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub uuid: String,
    pub identifier: String,
    pub name: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Codec-encoded step parameters.
    #[serde(default)]
    pub step_parameters: Vec<u8>,
    /// Advisers consulted, in order, when the node reaches a broke status.
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    #[serde(default)]
    pub facilitator_obtainments: Vec<FacilitatorObtainment>,
}

impl PlanNode {
    /// The first facilitator's mode hint, if any.
    pub fn mode_hint(&self) -> Option<ExecutionMode> {
        self.facilitator_obtainments.first().map(|f| f.mode_hint)
    }
}
