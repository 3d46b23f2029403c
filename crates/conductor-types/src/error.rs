use thiserror::Error;
use uuid::Uuid;

/// Errors related to ambiance derivation and lookup.
///
/// These are programmer errors and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmbianceError {
    #[error("invalid ambiance state: {0}")]
    InvalidAmbianceState(&'static str),

    #[error("runtime id '{0}' is not a valid node execution id")]
    InvalidRuntimeId(String),
}

/// Errors from repository operations (used by trait definitions in conductor-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// The record's version moved since it was read. The caller must re-fetch
    /// and re-evaluate before writing again.
    #[error("concurrent modification of {id}: expected version {expected}, found {actual}")]
    ConcurrentModification { id: Uuid, expected: u64, actual: u64 },
}

impl RepositoryError {
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, RepositoryError::ConcurrentModification { .. })
    }
}
