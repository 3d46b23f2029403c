//! Plan source trait definition.

use std::sync::Arc;

use conductor_types::plan::PlanNode;

/// Read-only lookup of static plan nodes by setup id.
///
/// Nodes never change while a plan executes, so lookups are synchronous.
pub trait PlanSource: Send + Sync {
    fn get_node(&self, setup_id: &str) -> Option<Arc<PlanNode>>;
}
