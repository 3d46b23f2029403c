//! Child-response accumulation.
//!
//! When a parent resumes in a mode that requires accumulation, its input is
//! rebuilt from the persisted state of its active children instead of the
//! delivered payload. Each child contributes one `StepResponseNotifyData`
//! keyed by the child's node setup uuid.

use conductor_types::error::RepositoryError;
use conductor_types::notify::{ResponseMap, StepResponseNotifyData};
use uuid::Uuid;

use crate::repository::node_execution::NodeExecutionStore;

/// Build the resume map for `parent_id` from its active children.
pub async fn accumulate_child_responses<S: NodeExecutionStore>(
    store: &S,
    parent_id: Uuid,
) -> Result<ResponseMap, RepositoryError> {
    let children = store.list_children(parent_id, true).await?;

    let mut responses = ResponseMap::new();
    for child in &children {
        let data = serde_json::to_value(StepResponseNotifyData::from(child))
            .map_err(|e| RepositoryError::Query(format!("serialize child response: {e}")))?;
        responses.insert(child.node_id.clone(), data);
    }

    tracing::debug!(
        parent_id = %parent_id,
        children = responses.len(),
        "accumulated child responses"
    );
    Ok(responses)
}

/// Decode every value of `responses` as a child summary.
///
/// Entries that are not child summaries are skipped.
pub fn child_summaries(responses: &ResponseMap) -> Vec<StepResponseNotifyData> {
    responses
        .values()
        .filter_map(|v| serde_json::from_value::<StepResponseNotifyData>(v.clone()).ok())
        .collect()
}
