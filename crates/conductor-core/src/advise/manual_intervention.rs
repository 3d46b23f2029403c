//! Manual-intervention advisers.
//!
//! Both park the failed node in `InterventionWaiting` until a human applies a
//! repair action or the timeout expires. Neither advises a node that is
//! leaving an intervention wait, so a node never re-enters the wait it just
//! left.

use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_types::advise::{
    AdviserResponse, AdvisingEvent, DEFAULT_INTERVENTION_TIMEOUT_SECS,
    ManualInterventionParameters, ROLLBACK_METADATA_KEY, RepairActionCode,
};
use conductor_types::execution::Status;
use conductor_types::plan::AdviserType;

use super::{AdviseError, Adviser, decode_adviser_parameters, is_adviseable};
use crate::codec::ParameterCodec;

fn can_intervene(
    codec: &dyn ParameterCodec,
    adviser: &str,
    event: &AdvisingEvent,
) -> Result<bool, AdviseError> {
    if !is_adviseable(event) || event.from_status == Status::InterventionWaiting {
        return Ok(false);
    }
    let params: ManualInterventionParameters = decode_adviser_parameters(codec, adviser, event)?;
    Ok(event.matches_failure_types(&params.applicable_failure_types))
}

// ---------------------------------------------------------------------------
// ManualInterventionAdviser
// ---------------------------------------------------------------------------

pub struct ManualInterventionAdviser {
    codec: Arc<dyn ParameterCodec>,
}

impl ManualInterventionAdviser {
    pub fn new(codec: Arc<dyn ParameterCodec>) -> Self {
        Self { codec }
    }
}

impl Adviser for ManualInterventionAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new(AdviserType::MANUAL_INTERVENTION)
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        can_intervene(self.codec.as_ref(), AdviserType::MANUAL_INTERVENTION, event)
    }

    fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        let params: ManualInterventionParameters = decode_adviser_parameters(
            self.codec.as_ref(),
            AdviserType::MANUAL_INTERVENTION,
            event,
        )?;
        Ok(AdviserResponse::InterventionWait {
            timeout_secs: params
                .timeout_secs
                .unwrap_or(DEFAULT_INTERVENTION_TIMEOUT_SECS),
            repair_action_code: params.timeout_action,
            metadata: BTreeMap::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// ManualInterventionWithRollbackAdviser
// ---------------------------------------------------------------------------

/// Like [`ManualInterventionAdviser`], but a rollback timeout action is
/// carried as `CustomFailure` with the strategy in the `ROLLBACK` metadata.
pub struct ManualInterventionWithRollbackAdviser {
    codec: Arc<dyn ParameterCodec>,
}

impl ManualInterventionWithRollbackAdviser {
    pub fn new(codec: Arc<dyn ParameterCodec>) -> Self {
        Self { codec }
    }
}

impl Adviser for ManualInterventionWithRollbackAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new(AdviserType::MANUAL_INTERVENTION_WITH_ROLLBACK)
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        can_intervene(
            self.codec.as_ref(),
            AdviserType::MANUAL_INTERVENTION_WITH_ROLLBACK,
            event,
        )
    }

    fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        let params: ManualInterventionParameters = decode_adviser_parameters(
            self.codec.as_ref(),
            AdviserType::MANUAL_INTERVENTION_WITH_ROLLBACK,
            event,
        )?;

        let mut metadata = BTreeMap::new();
        let repair_action_code = match params.timeout_action {
            code @ (RepairActionCode::StageRollback | RepairActionCode::StepGroupRollback) => {
                metadata.insert(ROLLBACK_METADATA_KEY.to_string(), code.as_str().to_string());
                RepairActionCode::CustomFailure
            }
            other => other,
        };

        Ok(AdviserResponse::InterventionWait {
            timeout_secs: params
                .timeout_secs
                .unwrap_or(DEFAULT_INTERVENTION_TIMEOUT_SECS),
            repair_action_code,
            metadata,
        })
    }
}
