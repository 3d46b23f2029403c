//! Adviser framework.
//!
//! When a node reaches a broke status the engine walks the node's adviser
//! obtainments in declaration order. The first adviser whose `can_advise`
//! returns `true` produces the `AdviserResponse`; later advisers are never
//! consulted. If none matches, the node keeps its broke status.

pub mod basic;
pub mod manual_intervention;
pub mod registry;
pub mod retry;

use conductor_types::advise::{AdviserResponse, AdvisingEvent};
use conductor_types::plan::AdviserType;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::codec::{ParameterCodec, decode_parameters};

pub use basic::{AbortAdviser, IgnoreAdviser, RollbackAdviser};
pub use manual_intervention::{ManualInterventionAdviser, ManualInterventionWithRollbackAdviser};
pub use registry::{Advice, AdviserChain, AdviserRegistry};
pub use retry::RetryAdviser;

#[derive(Debug, Error)]
pub enum AdviseError {
    #[error("invalid parameters for adviser {adviser}: {reason}")]
    InvalidParameters { adviser: String, reason: String },

    #[error("no adviser registered for type {0}")]
    UnknownAdviser(String),
}

/// A pluggable recovery policy.
///
/// Advisers are pure decision functions over an `AdvisingEvent`, so the
/// trait is synchronous and object-safe.
pub trait Adviser: Send + Sync {
    fn adviser_type(&self) -> AdviserType;

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError>;

    fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError>;
}

/// Guard shared by every built-in adviser: the event must follow a broke
/// transition and must not come from an expired intervention.
pub fn is_adviseable(event: &AdvisingEvent) -> bool {
    !event.previous_adviser_expired && event.to_status.is_broke()
}

/// Decode the event's adviser parameters for `adviser`.
pub(crate) fn decode_adviser_parameters<T: DeserializeOwned>(
    codec: &dyn ParameterCodec,
    adviser: &str,
    event: &AdvisingEvent,
) -> Result<T, AdviseError> {
    decode_parameters(codec, &event.adviser_parameters).map_err(|e| {
        AdviseError::InvalidParameters {
            adviser: adviser.to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use conductor_types::advise::AdvisingEvent;
    use conductor_types::ambiance::{Ambiance, Level, StepCategory, StepType};
    use conductor_types::execution::{FailureInfo, FailureType, Status};
    use serde::Serialize;

    use crate::codec::{ParameterCodec, VersionedJsonCodec, encode_parameters};

    pub fn codec() -> Arc<dyn ParameterCodec> {
        Arc::new(VersionedJsonCodec)
    }

    pub fn event<P: Serialize>(params: &P, failure_types: &[FailureType]) -> AdvisingEvent {
        let ambiance = Ambiance::new("exec", "plan").push(Level {
            setup_id: "setup".to_string(),
            runtime_id: "runtime".to_string(),
            identifier: "step".to_string(),
            step_type: StepType::new("SHELL", StepCategory::Step),
            group: None,
            retry_index: 0,
            start_ts: None,
        });
        AdvisingEvent {
            ambiance,
            from_status: Status::Running,
            to_status: Status::Failed,
            adviser_parameters: encode_parameters(&VersionedJsonCodec, params).unwrap(),
            failure_info: Some(FailureInfo::new("boom", failure_types.iter().copied())),
            previous_adviser_expired: false,
            retry_ids: Vec::new(),
        }
    }
}
