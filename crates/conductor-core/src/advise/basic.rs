//! Ignore, abort and rollback advisers.

use std::sync::Arc;

use conductor_types::advise::{
    AdviserResponse, AdvisingEvent, FailureTypeParameters, RollbackParameters, RollbackStrategy,
};
use conductor_types::plan::AdviserType;

use super::{AdviseError, Adviser, decode_adviser_parameters, is_adviseable};
use crate::codec::ParameterCodec;

fn matches_failure_filter(
    codec: &dyn ParameterCodec,
    adviser: &str,
    event: &AdvisingEvent,
) -> Result<bool, AdviseError> {
    if !is_adviseable(event) {
        return Ok(false);
    }
    let params: FailureTypeParameters = decode_adviser_parameters(codec, adviser, event)?;
    Ok(event.matches_failure_types(&params.applicable_failure_types))
}

/// Marks the failure as ignored: the node ends `IgnoreFailed`.
pub struct IgnoreAdviser {
    codec: Arc<dyn ParameterCodec>,
}

impl IgnoreAdviser {
    pub fn new(codec: Arc<dyn ParameterCodec>) -> Self {
        Self { codec }
    }
}

impl Adviser for IgnoreAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new(AdviserType::IGNORE)
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        matches_failure_filter(self.codec.as_ref(), AdviserType::IGNORE, event)
    }

    fn on_advise_event(&self, _event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        Ok(AdviserResponse::IgnoreFailure)
    }
}

/// Ends the node in its broke status.
pub struct AbortAdviser {
    codec: Arc<dyn ParameterCodec>,
}

impl AbortAdviser {
    pub fn new(codec: Arc<dyn ParameterCodec>) -> Self {
        Self { codec }
    }
}

impl Adviser for AbortAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new(AdviserType::ABORT)
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        matches_failure_filter(self.codec.as_ref(), AdviserType::ABORT, event)
    }

    fn on_advise_event(&self, _event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        Ok(AdviserResponse::End)
    }
}

pub struct RollbackAdviser {
    codec: Arc<dyn ParameterCodec>,
}

impl RollbackAdviser {
    pub fn new(codec: Arc<dyn ParameterCodec>) -> Self {
        Self { codec }
    }

    fn parameters(&self, event: &AdvisingEvent) -> Result<RollbackParameters, AdviseError> {
        decode_adviser_parameters(self.codec.as_ref(), AdviserType::ROLLBACK, event)
    }
}

impl Adviser for RollbackAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new(AdviserType::ROLLBACK)
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        if !is_adviseable(event) {
            return Ok(false);
        }
        let params = self.parameters(event)?;
        Ok(event.matches_failure_types(&params.applicable_failure_types))
    }

    fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        Ok(match self.parameters(event)?.strategy {
            RollbackStrategy::StageRollback => AdviserResponse::StageRollback,
            RollbackStrategy::StepGroupRollback => AdviserResponse::StepGroupRollback,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::advise::test_support::{codec, event};
    use conductor_types::execution::{FailureType, Status};

    fn timeouts() -> FailureTypeParameters {
        FailureTypeParameters {
            applicable_failure_types: BTreeSet::from([FailureType::Timeout]),
        }
    }

    #[test]
    fn ignore_matches_applicable_type() {
        let adviser = IgnoreAdviser::new(codec());
        assert!(adviser.can_advise(&event(&timeouts(), &[FailureType::Timeout])).unwrap());
        assert!(!adviser.can_advise(&event(&timeouts(), &[FailureType::Application])).unwrap());
        assert_eq!(
            adviser.on_advise_event(&event(&timeouts(), &[])).unwrap(),
            AdviserResponse::IgnoreFailure
        );
    }

    #[test]
    fn abort_ends_the_node() {
        let adviser = AbortAdviser::new(codec());
        let ev = event(&timeouts(), &[]);
        assert!(adviser.can_advise(&ev).unwrap());
        assert_eq!(adviser.on_advise_event(&ev).unwrap(), AdviserResponse::End);
    }

    #[test]
    fn abort_declines_positive_transition() {
        let mut ev = event(&timeouts(), &[]);
        ev.to_status = Status::IgnoreFailed;
        assert!(!AbortAdviser::new(codec()).can_advise(&ev).unwrap());
    }

    #[test]
    fn rollback_follows_strategy() {
        let adviser = RollbackAdviser::new(codec());
        let stage = RollbackParameters {
            applicable_failure_types: BTreeSet::new(),
            strategy: RollbackStrategy::StageRollback,
        };
        assert_eq!(
            adviser.on_advise_event(&event(&stage, &[])).unwrap(),
            AdviserResponse::StageRollback
        );

        let group = RollbackParameters {
            applicable_failure_types: BTreeSet::new(),
            strategy: RollbackStrategy::StepGroupRollback,
        };
        assert_eq!(
            adviser.on_advise_event(&event(&group, &[])).unwrap(),
            AdviserResponse::StepGroupRollback
        );
    }
}
