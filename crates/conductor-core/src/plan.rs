//! Plan document parsing, validation and compilation.
//!
//! A `PlanDocument` is the YAML form a host loads from disk. Compiling it
//! encodes every adviser config and step parameter set through the
//! `ParameterCodec`, producing a `Plan` of immutable `PlanNode`s that serves
//! as the engine's `PlanSource`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use conductor_types::advise::{
    FailureTypeParameters, ManualInterventionParameters, RetryAdviserParameters,
    RollbackParameters,
};
use conductor_types::ambiance::{StepCategory, StepType};
use conductor_types::execution::ExecutionMode;
use conductor_types::plan::{AdviserObtainment, AdviserType, FacilitatorObtainment, PlanNode};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CodecError, ParameterCodec};
use crate::repository::plan::PlanSource;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    /// A node references a child that is not defined.
    #[error("node '{node}' references unknown child '{child}'")]
    UnknownChild { node: String, child: String },

    #[error("cycle detected through node '{0}'")]
    CycleDetected(String),

    #[error("invalid parameters for adviser {adviser} on node '{node}': {reason}")]
    InvalidAdviserParameters {
        node: String,
        adviser: String,
        reason: String,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// YAML representation of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub plan_id: String,
    /// Id of the node the plan execution starts from.
    pub root: String,
    pub nodes: Vec<NodeDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    /// Defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default = "default_category")]
    pub category: StepCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisers: Vec<AdviserDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
}

fn default_category() -> StepCategory {
    StepCategory::Step
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserDocument {
    #[serde(rename = "type")]
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl NodeDocument {
    /// Child node ids referenced through the `child` / `children` parameters
    /// used by the structural steps.
    pub fn child_references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        if let Some(child) = self.parameters.get("child").and_then(|v| v.as_str()) {
            refs.push(child);
        }
        if let Some(children) = self.parameters.get("children").and_then(|v| v.as_array()) {
            refs.extend(children.iter().filter_map(|v| v.as_str()));
        }
        refs
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `PlanDocument`.
pub fn parse_plan_yaml(yaml: &str) -> Result<PlanDocument, PlanError> {
    let doc: PlanDocument =
        serde_yaml_ng::from_str(yaml).map_err(|e| PlanError::ParseError(e.to_string()))?;
    validate_plan(&doc)?;
    Ok(doc)
}

pub fn load_plan_file(path: &Path) -> Result<PlanDocument, PlanError> {
    let content = std::fs::read_to_string(path)?;
    parse_plan_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `PlanDocument`.
///
/// Checks:
/// - At least one node exists and the root is defined
/// - All node ids are unique and step types are non-empty
/// - All child references resolve and no child is listed twice
/// - Child references contain no cycle
/// - Parameters of built-in adviser types decode into their typed form
pub fn validate_plan(doc: &PlanDocument) -> Result<(), PlanError> {
    if doc.nodes.is_empty() {
        return Err(PlanError::ValidationError(
            "plan must have at least one node".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    for node in &doc.nodes {
        if node.step_type.trim().is_empty() {
            return Err(PlanError::ValidationError(format!(
                "node '{}' has an empty step type",
                node.id
            )));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(PlanError::ValidationError(format!(
                "duplicate node id: '{}'",
                node.id
            )));
        }
    }

    if !ids.contains(doc.root.as_str()) {
        return Err(PlanError::ValidationError(format!(
            "root node '{}' is not defined",
            doc.root
        )));
    }

    for node in &doc.nodes {
        let mut children = HashSet::new();
        for child in node.child_references() {
            if !ids.contains(child) {
                return Err(PlanError::UnknownChild {
                    node: node.id.clone(),
                    child: child.to_string(),
                });
            }
            if !children.insert(child) {
                return Err(PlanError::ValidationError(format!(
                    "node '{}' lists child '{}' more than once",
                    node.id, child
                )));
            }
        }
        for adviser in &node.advisers {
            check_adviser_parameters(&node.id, adviser)?;
        }
    }

    detect_cycles(doc)
}

fn check_adviser_parameters(node: &str, adviser: &AdviserDocument) -> Result<(), PlanError> {
    let value = parameters_or_empty(&adviser.parameters);
    let result = match adviser.adviser_type.as_str() {
        AdviserType::RETRY => serde_json::from_value::<RetryAdviserParameters>(value).map(drop),
        AdviserType::MANUAL_INTERVENTION | AdviserType::MANUAL_INTERVENTION_WITH_ROLLBACK => {
            serde_json::from_value::<ManualInterventionParameters>(value).map(drop)
        }
        AdviserType::IGNORE | AdviserType::ABORT => {
            serde_json::from_value::<FailureTypeParameters>(value).map(drop)
        }
        AdviserType::ROLLBACK => serde_json::from_value::<RollbackParameters>(value).map(drop),
        // Custom advisers validate their own parameters at advise time.
        _ => Ok(()),
    };
    result.map_err(|e| PlanError::InvalidAdviserParameters {
        node: node.to_string(),
        adviser: adviser.adviser_type.clone(),
        reason: e.to_string(),
    })
}

fn parameters_or_empty(value: &serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        serde_json::json!({})
    } else {
        value.clone()
    }
}

/// Build the parent -> child graph and reject cycles via topological sort.
fn detect_cycles(doc: &PlanDocument) -> Result<(), PlanError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, NodeIndex> = doc
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for node in &doc.nodes {
        let from = indices[node.id.as_str()];
        for child in node.child_references() {
            if let Some(&to) = indices.get(child) {
                graph.add_edge(from, to, ());
            }
        }
    }

    toposort(&graph, None)
        .map(drop)
        .map_err(|cycle| PlanError::CycleDetected(graph[cycle.node_id()].to_string()))
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// A compiled plan: immutable nodes indexed by setup id.
#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_id: String,
    pub root_node_id: String,
    nodes: HashMap<String, Arc<PlanNode>>,
}

impl Plan {
    pub fn from_nodes(
        plan_id: impl Into<String>,
        root_node_id: impl Into<String>,
        nodes: impl IntoIterator<Item = PlanNode>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            root_node_id: root_node_id.into(),
            nodes: nodes
                .into_iter()
                .map(|n| (n.uuid.clone(), Arc::new(n)))
                .collect(),
        }
    }

    /// Compiled nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<PlanNode>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PlanSource for Plan {
    fn get_node(&self, setup_id: &str) -> Option<Arc<PlanNode>> {
        self.nodes.get(setup_id).cloned()
    }
}

/// Validate `doc` and encode it into a `Plan`.
pub fn compile_plan(doc: &PlanDocument, codec: &dyn ParameterCodec) -> Result<Plan, PlanError> {
    validate_plan(doc)?;

    let mut nodes = Vec::with_capacity(doc.nodes.len());
    for node in &doc.nodes {
        let step_parameters = if node.parameters.is_null() {
            Vec::new()
        } else {
            codec.encode_value(&node.parameters)?
        };

        let mut adviser_obtainments = Vec::with_capacity(node.advisers.len());
        for adviser in &node.advisers {
            adviser_obtainments.push(AdviserObtainment {
                adviser_type: AdviserType::new(adviser.adviser_type.clone()),
                parameters: codec.encode_value(&parameters_or_empty(&adviser.parameters))?,
            });
        }

        nodes.push(PlanNode {
            uuid: node.id.clone(),
            identifier: node.identifier.clone().unwrap_or_else(|| node.id.clone()),
            name: node.name.clone().unwrap_or_else(|| node.id.clone()),
            step_type: StepType::new(node.step_type.clone(), node.category),
            group: node.group.clone(),
            step_parameters,
            adviser_obtainments,
            facilitator_obtainments: node
                .mode
                .map(|mode_hint| vec![FacilitatorObtainment { mode_hint }])
                .unwrap_or_default(),
        });
    }

    tracing::debug!(plan_id = %doc.plan_id, nodes = nodes.len(), "compiled plan");
    Ok(Plan::from_nodes(doc.plan_id.clone(), doc.root.clone(), nodes))
}
