//! SQLite node execution store.
//!
//! Implements `NodeExecutionStore` from `conductor-core`. Each record is
//! stored whole as JSON in `data`, with the filter columns (`parent_id`,
//! `plan_execution_id`, `status`, `old_retry`, `version`) kept alongside.
//! Writes are read-modify-write guarded by `WHERE id = ? AND version = ?`.

use chrono::{DateTime, SecondsFormat, Utc};
use conductor_core::repository::node_execution::{
    NodeExecutionStore, StatusUpdate, apply_executable_response, apply_status_update,
    check_version,
};
use conductor_types::error::RepositoryError;
use conductor_types::execution::{ExecutableResponse, NodeExecution, Outcome, Status};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// Attempts for writes that carry no caller version.
const UNVERSIONED_WRITE_ATTEMPTS: usize = 5;

pub struct SqliteNodeExecutionStore {
    pool: DatabasePool,
}

impl SqliteNodeExecutionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Read, check, mutate and conditionally write one record.
    ///
    /// `expected_version = None` skips the caller check but the write is
    /// still conditional on the version that was read.
    async fn mutate<F>(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        mutate: F,
    ) -> Result<NodeExecution, RepositoryError>
    where
        F: FnOnce(&mut NodeExecution),
    {
        let mut ne = self.get(id).await?.ok_or(RepositoryError::NotFound)?;
        if let Some(expected) = expected_version {
            check_version(&ne, expected)?;
        }
        let read_version = ne.version;
        mutate(&mut ne);
        ne.version = read_version + 1;

        let data = encode(&ne)?;
        let result = sqlx::query(
            "UPDATE node_executions
             SET status = ?, old_retry = ?, version = ?, end_ts = ?, data = ?
             WHERE id = ? AND version = ?",
        )
        .bind(ne.status.to_string())
        .bind(ne.old_retry)
        .bind(ne.version as i64)
        .bind(ne.end_ts.as_ref().map(format_datetime))
        .bind(&data)
        .bind(id.to_string())
        .bind(read_version as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            let actual = self
                .current_version(id)
                .await?
                .ok_or(RepositoryError::NotFound)?;
            return Err(RepositoryError::ConcurrentModification {
                id,
                expected: read_version,
                actual,
            });
        }
        Ok(ne)
    }

    async fn current_version(&self, id: Uuid) -> Result<Option<u64>, RepositoryError> {
        let row = sqlx::query("SELECT version FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.map(|r| {
            r.try_get::<i64, _>("version")
                .map(|v| v as u64)
                .map_err(|e| RepositoryError::Query(e.to_string()))
        })
        .transpose()
    }

    async fn fetch_list(
        &self,
        sql: &str,
        key: String,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        let rows = sqlx::query(sql)
            .bind(key)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(NodeExecutionRow::from_row(row)?.into_execution()?);
        }
        Ok(out)
    }
}

/// Internal row type for mapping SQLite rows to `NodeExecution`.
struct NodeExecutionRow {
    id: String,
    version: i64,
    data: String,
}

impl NodeExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, RepositoryError> {
        let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());
        Ok(Self {
            id: row.try_get("id").map_err(get)?,
            version: row.try_get("version").map_err(get)?,
            data: row.try_get("data").map_err(get)?,
        })
    }

    fn into_execution(self) -> Result<NodeExecution, RepositoryError> {
        let id = parse_uuid(&self.id)?;
        let mut ne: NodeExecution = serde_json::from_str(&self.data)
            .map_err(|e| RepositoryError::Query(format!("invalid node execution JSON: {e}")))?;
        if ne.uuid != id {
            return Err(RepositoryError::Query(format!(
                "row {id} holds node execution {}",
                ne.uuid
            )));
        }
        // The column is authoritative.
        ne.version = self.version as u64;
        Ok(ne)
    }
}

fn encode(ne: &NodeExecution) -> Result<String, RepositoryError> {
    serde_json::to_string(ne)
        .map_err(|e| RepositoryError::Query(format!("serialize node execution: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

/// Fixed-width RFC 3339 so lexicographic order matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl NodeExecutionStore for SqliteNodeExecutionStore {
    async fn save(&self, ne: &NodeExecution) -> Result<(), RepositoryError> {
        let data = encode(ne)?;
        let result = sqlx::query(
            "INSERT INTO node_executions (id, plan_execution_id, node_id, parent_id, status, old_retry, version, start_ts, end_ts, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ne.uuid.to_string())
        .bind(&ne.ambiance.plan_execution_id)
        .bind(&ne.node_id)
        .bind(ne.parent_id.map(|p| p.to_string()))
        .bind(ne.status.to_string())
        .bind(ne.old_retry)
        .bind(ne.version as i64)
        .bind(format_datetime(&ne.start_ts))
        .bind(ne.end_ts.as_ref().map(format_datetime))
        .bind(&data)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => Err(
                RepositoryError::Conflict(format!("node execution {} already exists", ne.uuid)),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        let row = sqlx::query("SELECT id, version, data FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(NodeExecutionRow::from_row(&row)?.into_execution()?)),
            None => Ok(None),
        }
    }

    async fn update_status_with_version_check(
        &self,
        id: Uuid,
        expected_version: u64,
        new_status: Status,
        update: StatusUpdate,
    ) -> Result<NodeExecution, RepositoryError> {
        let updated = self
            .mutate(id, Some(expected_version), |ne| {
                apply_status_update(ne, new_status, update)
            })
            .await?;
        tracing::debug!(node_execution_id = %id, status = %new_status, version = updated.version, "status written");
        Ok(updated)
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
        .await
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
        .await
    }

    async fn list_children(
        &self,
        parent_id: Uuid,
        only_active: bool,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        let sql = if only_active {
            "SELECT id, version, data FROM node_executions
             WHERE parent_id = ? AND old_retry = 0 ORDER BY start_ts, id"
        } else {
            "SELECT id, version, data FROM node_executions
             WHERE parent_id = ? ORDER BY start_ts, id"
        };
        self.fetch_list(sql, parent_id.to_string()).await
    }

    async fn mark_retried(&self, id: Uuid) -> Result<NodeExecution, RepositoryError> {
        let mut last_err = RepositoryError::NotFound;
        for _ in 0..UNVERSIONED_WRITE_ATTEMPTS {
            match self.mutate(id, None, |ne| ne.old_retry = true).await {
                Ok(ne) => return Ok(ne),
                Err(e) if e.is_concurrent_modification() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn list_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        self.fetch_list(
            "SELECT id, version, data FROM node_executions
             WHERE plan_execution_id = ? ORDER BY start_ts, id",
            plan_execution_id.to_string(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use conductor_types::ambiance::{Ambiance, Level, StepCategory, StepType};
    use conductor_types::execution::{ExecutionMode, FailureInfo, FailureType};
    use conductor_types::plan::PlanNode;

    async fn test_store() -> (SqliteNodeExecutionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteNodeExecutionStore::new(pool), dir)
    }

    fn execution(node_id: &str, parent: Option<Uuid>) -> NodeExecution {
        let node = PlanNode {
            uuid: node_id.to_string(),
            identifier: node_id.to_string(),
            name: node_id.to_string(),
            step_type: StepType::new("SHELL", StepCategory::Step),
            group: None,
            step_parameters: Vec::new(),
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
        };
        let id = Uuid::now_v7();
        let ambiance = Ambiance::new("exec-1", "plan").push(Level {
            setup_id: node_id.to_string(),
            runtime_id: id.to_string(),
            identifier: node_id.to_string(),
            step_type: node.step_type.clone(),
            group: None,
            retry_index: 0,
            start_ts: None,
        });
        NodeExecution::new(id, ambiance, &node, parent)
    }

    #[tokio::test]
    async fn save_and_get_roundtrip() {
        let (store, _dir) = test_store().await;
        let ne = execution("build", None);
        store.save(&ne).await.unwrap();

        let loaded = store.get(ne.uuid).await.unwrap().unwrap();
        assert_eq!(loaded, ne);
        assert!(store.get(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_save_conflicts() {
        let (store, _dir) = test_store().await;
        let ne = execution("build", None);
        store.save(&ne).await.unwrap();
        assert!(matches!(
            store.save(&ne).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn version_checked_status_update() {
        let (store, _dir) = test_store().await;
        let ne = execution("build", None);
        store.save(&ne).await.unwrap();

        let running = store
            .update_status_with_version_check(ne.uuid, 0, Status::Running, StatusUpdate::none())
            .await
            .unwrap();
        assert_eq!(running.version, 1);

        let failed = store
            .update_status_with_version_check(
                ne.uuid,
                1,
                Status::Failed,
                StatusUpdate::none()
                    .with_failure(Some(FailureInfo::new("exit 1", [FailureType::Application]))),
            )
            .await
            .unwrap();
        assert_eq!(failed.version, 2);
        assert!(failed.end_ts.is_some());

        let err = store
            .update_status_with_version_check(ne.uuid, 1, Status::Succeeded, StatusUpdate::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::ConcurrentModification {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        let stored = store.get(ne.uuid).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert_eq!(stored.failure_info.unwrap().error_message, "exit 1");
    }

    #[tokio::test]
    async fn concurrent_writers_with_same_version_have_one_winner() {
        let (store, _dir) = test_store().await;
        let store = Arc::new(store);
        let ne = execution("build", None);
        store.save(&ne).await.unwrap();

        let mut handles = Vec::new();
        for status in [Status::Succeeded, Status::Failed] {
            let store = Arc::clone(&store);
            let id = ne.uuid;
            handles.push(tokio::spawn(async move {
                store
                    .update_status_with_version_check(id, 0, status, StatusUpdate::none())
                    .await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) if e.is_concurrent_modification() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(store.get(ne.uuid).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn append_response_moves_to_waiting() {
        let (store, _dir) = test_store().await;
        let ne = execution("build", None);
        store.save(&ne).await.unwrap();

        let waiting = store
            .append_executable_response(
                ne.uuid,
                0,
                ExecutableResponse::Task {
                    correlation_ids: vec!["c-1".to_string()],
                    task_name: "compile".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(waiting.status, Status::TaskWaiting);
        assert_eq!(waiting.mode, Some(ExecutionMode::Task));

        let stored = store.get(ne.uuid).await.unwrap().unwrap();
        assert_eq!(stored.executable_responses.len(), 1);
    }

    #[tokio::test]
    async fn outcomes_are_keyed_by_name() {
        let (store, _dir) = test_store().await;
        let ne = execution("build", None);
        store.save(&ne).await.unwrap();

        store
            .save_outcome(ne.uuid, 0, Outcome::new("result", "json", serde_json::json!(1)))
            .await
            .unwrap();
        let ne = store
            .save_outcome(ne.uuid, 1, Outcome::new("result", "json", serde_json::json!(2)))
            .await
            .unwrap();
        assert_eq!(ne.outcomes.len(), 1);
        assert_eq!(ne.outcomes["result"].data, serde_json::json!(2));
    }

    #[tokio::test]
    async fn children_listing_respects_retries() {
        let (store, _dir) = test_store().await;
        let parent = execution("parent", None);
        store.save(&parent).await.unwrap();

        let first = execution("child", Some(parent.uuid));
        store.save(&first).await.unwrap();
        let second = execution("child", Some(parent.uuid));
        store.save(&second).await.unwrap();

        store.mark_retried(first.uuid).await.unwrap();

        let all = store.list_children(parent.uuid, false).await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.uuid).collect::<Vec<_>>(),
            vec![first.uuid, second.uuid]
        );
        let active = store.list_children(parent.uuid, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].uuid, second.uuid);
    }

    #[tokio::test]
    async fn list_by_plan_execution_returns_all_nodes() {
        let (store, _dir) = test_store().await;
        let parent = execution("parent", None);
        store.save(&parent).await.unwrap();
        store.save(&execution("child", Some(parent.uuid))).await.unwrap();

        assert_eq!(store.list_by_plan_execution("exec-1").await.unwrap().len(), 2);
        assert!(store.list_by_plan_execution("exec-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (store, _dir) = test_store().await;
        let err = store
            .update_status_with_version_check(
                Uuid::now_v7(),
                0,
                Status::Running,
                StatusUpdate::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
