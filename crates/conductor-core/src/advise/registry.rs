//! Adviser registry and the first-match adviser chain.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::advise::{AdviserResponse, AdvisingEvent};
use conductor_types::plan::{AdviserType, PlanNode};

use super::{
    AbortAdviser, AdviseError, Adviser, IgnoreAdviser, ManualInterventionAdviser,
    ManualInterventionWithRollbackAdviser, RetryAdviser, RollbackAdviser,
};
use crate::codec::ParameterCodec;
use crate::plan::Plan;

/// Registry of available advisers, indexed by adviser type.
pub struct AdviserRegistry {
    advisers: HashMap<AdviserType, Arc<dyn Adviser>>,
}

impl AdviserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            advisers: HashMap::new(),
        }
    }

    /// Registry holding every built-in adviser.
    pub fn with_defaults(codec: Arc<dyn ParameterCodec>, intervention_timeout_secs: u64) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RetryAdviser::new(
            Arc::clone(&codec),
            intervention_timeout_secs,
        )));
        registry.register(Arc::new(ManualInterventionAdviser::new(Arc::clone(&codec))));
        registry.register(Arc::new(ManualInterventionWithRollbackAdviser::new(
            Arc::clone(&codec),
        )));
        registry.register(Arc::new(IgnoreAdviser::new(Arc::clone(&codec))));
        registry.register(Arc::new(AbortAdviser::new(Arc::clone(&codec))));
        registry.register(Arc::new(RollbackAdviser::new(codec)));
        registry
    }

    /// Register an adviser under its own type. Replaces any previous entry.
    pub fn register(&mut self, adviser: Arc<dyn Adviser>) {
        self.advisers.insert(adviser.adviser_type(), adviser);
    }

    pub fn get(&self, adviser_type: &AdviserType) -> Option<&Arc<dyn Adviser>> {
        self.advisers.get(adviser_type)
    }

    /// Fail with `UnknownAdviser` when a node of `plan` names an adviser
    /// type missing from this registry.
    pub fn check_plan(&self, plan: &Plan) -> Result<(), AdviseError> {
        for node in plan.nodes() {
            for obtainment in &node.adviser_obtainments {
                if !self.advisers.contains_key(&obtainment.adviser_type) {
                    tracing::warn!(
                        node_id = %node.uuid,
                        adviser = %obtainment.adviser_type,
                        "plan names an unregistered adviser"
                    );
                    return Err(AdviseError::UnknownAdviser(
                        obtainment.adviser_type.to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn list_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.advisers.keys().map(|t| t.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for AdviserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The response chosen for a node, with the adviser that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advice {
    pub adviser_type: AdviserType,
    pub response: AdviserResponse,
}

/// Walks a node's adviser obtainments in order; the first adviser that can
/// advise wins.
pub struct AdviserChain {
    registry: AdviserRegistry,
}

impl AdviserChain {
    pub fn new(registry: AdviserRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AdviserRegistry {
        &self.registry
    }

    /// Evaluate `node`'s advisers against `event`.
    ///
    /// `event.adviser_parameters` is replaced per obtainment. Returns `None`
    /// when no adviser matches.
    pub fn advise(
        &self,
        node: &PlanNode,
        event: &AdvisingEvent,
    ) -> Result<Option<Advice>, AdviseError> {
        for obtainment in &node.adviser_obtainments {
            let adviser = self
                .registry
                .get(&obtainment.adviser_type)
                .ok_or_else(|| AdviseError::UnknownAdviser(obtainment.adviser_type.to_string()))?;

            let mut scoped = event.clone();
            scoped.adviser_parameters = obtainment.parameters.clone();

            if !adviser.can_advise(&scoped)? {
                tracing::debug!(
                    node_id = %node.uuid,
                    adviser = %obtainment.adviser_type,
                    "adviser declined"
                );
                continue;
            }

            let response = adviser.on_advise_event(&scoped)?;
            tracing::info!(
                node_id = %node.uuid,
                adviser = %obtainment.adviser_type,
                response = response.kind(),
                "adviser responded"
            );
            return Ok(Some(Advice {
                adviser_type: obtainment.adviser_type.clone(),
                response,
            }));
        }

        tracing::debug!(node_id = %node.uuid, "no adviser matched");
        Ok(None)
    }
}
