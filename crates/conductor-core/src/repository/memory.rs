//! In-memory `NodeExecutionStore` backed by `DashMap`.
//!
//! Each mutation runs under the entry's shard lock, so the version check and
//! the write are atomic with respect to other writers of the same record.

use conductor_types::error::RepositoryError;
use conductor_types::execution::{ExecutableResponse, NodeExecution, Outcome, Status};
use dashmap::DashMap;
use uuid::Uuid;

use super::node_execution::{
    NodeExecutionStore, StatusUpdate, apply_executable_response, apply_status_update,
    check_version,
};

#[derive(Debug, Default)]
pub struct InMemoryNodeExecutionStore {
    records: DashMap<Uuid, NodeExecution>,
}

impl InMemoryNodeExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Run `mutate` on the record under its lock after the version check,
    /// then bump the version.
    fn mutate<F>(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        mutate: F,
    ) -> Result<NodeExecution, RepositoryError>
    where
        F: FnOnce(&mut NodeExecution),
    {
        let mut entry = self.records.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(expected) = expected_version {
            check_version(&entry, expected)?;
        }
        mutate(&mut entry);
        entry.version += 1;
        Ok(entry.clone())
    }

    fn collect_sorted<P>(&self, predicate: P) -> Vec<NodeExecution>
    where
        P: Fn(&NodeExecution) -> bool,
    {
        let mut out: Vec<NodeExecution> = self
            .records
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect();
        // v7 ids are time-ordered
        out.sort_by(|a, b| a.start_ts.cmp(&b.start_ts).then(a.uuid.cmp(&b.uuid)));
        out
    }
}

impl NodeExecutionStore for InMemoryNodeExecutionStore {
    async fn save(&self, ne: &NodeExecution) -> Result<(), RepositoryError> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(ne.uuid) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "node execution {} already exists",
                ne.uuid
            ))),
            Entry::Vacant(slot) => {
                slot.insert(ne.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        Ok(self.records.get(&id).map(|e| e.value().clone()))
    }

    async fn update_status_with_version_check(
        &self,
        id: Uuid,
        expected_version: u64,
        new_status: Status,
        update: StatusUpdate,
    ) -> Result<NodeExecution, RepositoryError> {
        self.mutate(id, Some(expected_version), |ne| {
            apply_status_update(ne, new_status, update)
        })
    }

    async fn append_executable_response(
        &self,
        id: Uuid,
        expected_version: u64,
        response: ExecutableResponse,
    ) -> Result<NodeExecution, RepositoryError> {
        self.mutate(id, Some(expected_version), |ne| {
            apply_executable_response(ne, response)
        })
    }

    async fn save_outcome(
        &self,
        id: Uuid,
        expected_version: u64,
        outcome: Outcome,
    ) -> Result<NodeExecution, RepositoryError> {
        self.mutate(id, Some(expected_version), |ne| {
            ne.outcomes.insert(outcome.name.clone(), outcome);
        })
    }

    async fn list_children(
        &self,
        parent_id: Uuid,
        only_active: bool,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        Ok(self.collect_sorted(|ne| {
            ne.parent_id == Some(parent_id) && (!only_active || ne.is_active())
        }))
    }

    async fn mark_retried(&self, id: Uuid) -> Result<NodeExecution, RepositoryError> {
        self.mutate(id, None, |ne| ne.old_retry = true)
    }

    async fn list_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        Ok(self.collect_sorted(|ne| ne.ambiance.plan_execution_id == plan_execution_id))
    }
}
