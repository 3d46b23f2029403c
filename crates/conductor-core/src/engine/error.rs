//! Engine error type.

use conductor_types::advise::RepairActionCode;
use conductor_types::error::{AmbianceError, RepositoryError};
use conductor_types::execution::Status;
use thiserror::Error;
use uuid::Uuid;

use crate::advise::AdviseError;
use crate::codec::CodecError;
use crate::waiter::WaiterError;

/// Failures surfaced by `OrchestrationEngine` operations.
///
/// Step failures are not errors here: they become `FailureInfo` on the
/// node and go through its advisers. What remains are configuration faults,
/// storage failures and conflicts that outlived the retry budget.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("ambiance error: {0}")]
    Ambiance(#[from] AmbianceError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("adviser error: {0}")]
    Advise(#[from] AdviseError),

    #[error("waiter error: {0}")]
    Waiter(#[from] WaiterError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("plan node not found: {0}")]
    NodeNotFound(String),

    #[error("node execution not found: {0}")]
    NodeExecutionNotFound(Uuid),

    #[error("no step registered for type {0}")]
    UnknownStepType(String),

    #[error("node execution {id} still conflicting after {attempts} attempts")]
    Transient { id: Uuid, attempts: u32 },

    #[error("repair action {0} cannot be applied to a waiting node")]
    InvalidRepairAction(RepairActionCode),

    #[error("node execution {id} is {status}, not waiting for intervention")]
    NotInterventionWaiting { id: Uuid, status: Status },
}

impl EngineError {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient { .. })
            || matches!(self, EngineError::Repository(e) if e.is_concurrent_modification())
    }
}
