//! Execution-hierarchy context threaded through every engine call.
//!
//! An `Ambiance` is an ordered stack of `Level`s (pipeline -> stage -> step group
//! -> step ...) plus flat scope metadata. It is an immutable value: `push`,
//! `pop` and friends return a new `Ambiance` and never touch the receiver, so
//! a context captured by a running node can be shared freely.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AmbianceError;

/// Setup-abstraction key for the account scope.
pub const ACCOUNT_ID_KEY: &str = "accountId";
/// Setup-abstraction key for the organization scope.
pub const ORG_ID_KEY: &str = "orgIdentifier";
/// Setup-abstraction key for the project scope.
pub const PROJECT_ID_KEY: &str = "projectIdentifier";

// ---------------------------------------------------------------------------
// StepType
// ---------------------------------------------------------------------------

/// Structural category of a node in the plan hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Pipeline,
    Stage,
    StepGroup,
    Step,
    Strategy,
    Fork,
}

/// The registered step implementation name plus its structural category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepType {
    /// Name used to look the step up in the step registry (e.g. "SECTION").
    #[serde(rename = "type")]
    pub type_name: String,
    pub category: StepCategory,
}

impl StepType {
    pub fn new(type_name: impl Into<String>, category: StepCategory) -> Self {
        Self {
            type_name: type_name.into(),
            category,
        }
    }
}

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

/// One entry of the ambiance stack: a single node in the execution hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Plan node uuid (static).
    pub setup_id: String,
    /// NodeExecution uuid (runtime).
    pub runtime_id: String,
    pub identifier: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// 0 for the first attempt, incremented on every retry.
    #[serde(default)]
    pub retry_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Ambiance
// ---------------------------------------------------------------------------

/// Immutable execution context: the level stack plus scope metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub levels: Vec<Level>,
    /// Flat account/org/project scope values.
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Handle to the expression-evaluation functor context of this execution.
    #[serde(default)]
    pub expression_functor_token: i64,
}

impl Ambiance {
    /// Create a root ambiance with no levels.
    pub fn new(plan_execution_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            plan_id: plan_id.into(),
            levels: Vec::new(),
            setup_abstractions: BTreeMap::new(),
            expression_functor_token: 0,
        }
    }

    /// Builder-style helper to attach a setup abstraction.
    pub fn with_abstraction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setup_abstractions.insert(key.into(), value.into());
        self
    }

    /// Return a copy with `level` appended.
    pub fn push(&self, level: Level) -> Ambiance {
        let mut next = self.clone();
        next.levels.push(level);
        next
    }

    /// Return a copy with the last level removed.
    ///
    /// Popping an empty stack yields an identical empty ambiance.
    pub fn pop(&self) -> Ambiance {
        let mut next = self.clone();
        next.levels.pop();
        next
    }

    /// Return a copy keeping only the first `levels_to_keep` levels.
    pub fn clone_with_levels(&self, levels_to_keep: usize) -> Ambiance {
        let mut next = self.clone();
        next.levels.truncate(levels_to_keep);
        next
    }

    /// Return a copy whose current level carries `retry_index`.
    pub fn with_retry_index(&self, retry_index: u32) -> Result<Ambiance, AmbianceError> {
        let mut next = self.clone();
        let level = next
            .levels
            .last_mut()
            .ok_or(AmbianceError::InvalidAmbianceState("empty level stack"))?;
        level.retry_index = retry_index;
        Ok(next)
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Runtime id (NodeExecution uuid) of the top level.
    pub fn current_runtime_id(&self) -> Result<&str, AmbianceError> {
        self.current_level()
            .map(|l| l.runtime_id.as_str())
            .ok_or(AmbianceError::InvalidAmbianceState(
                "runtime id requested on empty level stack",
            ))
    }

    /// Setup id (plan node uuid) of the top level.
    pub fn current_setup_id(&self) -> Result<&str, AmbianceError> {
        self.current_level()
            .map(|l| l.setup_id.as_str())
            .ok_or(AmbianceError::InvalidAmbianceState(
                "setup id requested on empty level stack",
            ))
    }

    /// Runtime id of the level below the current one, if any.
    pub fn parent_runtime_id(&self) -> Option<&str> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        Some(self.levels[len - 2].runtime_id.as_str())
    }

    pub fn current_retry_index(&self) -> u32 {
        self.current_level().map_or(0, |l| l.retry_index)
    }

    pub fn is_retry(&self) -> bool {
        self.current_retry_index() > 0
    }

    /// Innermost level with the `Stage` category.
    pub fn stage_level(&self) -> Option<&Level> {
        self.innermost(StepCategory::Stage)
    }

    /// Innermost level with the `StepGroup` category.
    pub fn step_group_level(&self) -> Option<&Level> {
        self.innermost(StepCategory::StepGroup)
    }

    fn innermost(&self, category: StepCategory) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|l| l.step_type.category == category)
    }

    /// Fully-qualified name built from level identifiers, e.g.
    /// `pipeline.stages.stage1.step1`.
    pub fn fqn(&self) -> String {
        self.levels
            .iter()
            .map(|l| l.identifier.as_str())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn account_id(&self) -> Option<&str> {
        self.setup_abstractions.get(ACCOUNT_ID_KEY).map(String::as_str)
    }

    pub fn org_id(&self) -> Option<&str> {
        self.setup_abstractions.get(ORG_ID_KEY).map(String::as_str)
    }

    pub fn project_id(&self) -> Option<&str> {
        self.setup_abstractions.get(PROJECT_ID_KEY).map(String::as_str)
    }
}
