//! Retry adviser.
//!
//! Retries a failed node while the current level's retry index is below the
//! configured count, then maps the post-retry repair action to a final
//! response.

use std::sync::Arc;

use conductor_types::advise::{
    AdviserResponse, AdvisingEvent, RepairActionCode, RetryAdviserParameters,
};
use conductor_types::plan::AdviserType;

use super::{AdviseError, Adviser, decode_adviser_parameters, is_adviseable};
use crate::codec::ParameterCodec;

pub struct RetryAdviser {
    codec: Arc<dyn ParameterCodec>,
    /// Timeout used when retries are exhausted into manual intervention.
    intervention_timeout_secs: u64,
}

impl RetryAdviser {
    pub fn new(codec: Arc<dyn ParameterCodec>, intervention_timeout_secs: u64) -> Self {
        Self {
            codec,
            intervention_timeout_secs,
        }
    }

    fn parameters(&self, event: &AdvisingEvent) -> Result<RetryAdviserParameters, AdviseError> {
        decode_adviser_parameters(self.codec.as_ref(), AdviserType::RETRY, event)
    }

    /// Wait before attempt `retry_index + 1`; the last interval repeats.
    pub fn wait_interval(params: &RetryAdviserParameters, retry_index: u32) -> u64 {
        let intervals = &params.wait_intervals_secs;
        if intervals.is_empty() {
            return 0;
        }
        let idx = (retry_index as usize).min(intervals.len() - 1);
        intervals[idx]
    }

    fn after_retries(&self, code: RepairActionCode) -> AdviserResponse {
        match code {
            RepairActionCode::ManualIntervention => AdviserResponse::InterventionWait {
                timeout_secs: self.intervention_timeout_secs,
                repair_action_code: RepairActionCode::Unknown,
                metadata: Default::default(),
            },
            RepairActionCode::Ignore => AdviserResponse::IgnoreFailure,
            RepairActionCode::StageRollback => AdviserResponse::StageRollback,
            RepairActionCode::StepGroupRollback => AdviserResponse::StepGroupRollback,
            _ => AdviserResponse::End,
        }
    }
}

impl Adviser for RetryAdviser {
    fn adviser_type(&self) -> AdviserType {
        AdviserType::new(AdviserType::RETRY)
    }

    fn can_advise(&self, event: &AdvisingEvent) -> Result<bool, AdviseError> {
        if !is_adviseable(event) {
            return Ok(false);
        }
        let params = self.parameters(event)?;
        Ok(event.matches_failure_types(&params.applicable_failure_types))
    }

    fn on_advise_event(&self, event: &AdvisingEvent) -> Result<AdviserResponse, AdviseError> {
        let params = self.parameters(event)?;
        let retry_index = event.ambiance.current_retry_index();

        if retry_index < params.retry_count {
            let wait_interval_secs = Self::wait_interval(&params, retry_index);
            tracing::debug!(
                retry_index,
                retry_count = params.retry_count,
                wait_interval_secs,
                "advising retry"
            );
            return Ok(AdviserResponse::Retry {
                retry_index: retry_index + 1,
                wait_interval_secs,
            });
        }

        tracing::debug!(
            retry_count = params.retry_count,
            after = %params.repair_action_code_after_retry,
            "retries exhausted"
        );
        Ok(self.after_retries(params.repair_action_code_after_retry))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::advise::test_support::{codec, event};
    use conductor_types::execution::{FailureType, Status};

    fn params(retry_count: u32, waits: &[u64], after: RepairActionCode) -> RetryAdviserParameters {
        RetryAdviserParameters {
            applicable_failure_types: BTreeSet::from([FailureType::Connectivity]),
            retry_count,
            wait_intervals_secs: waits.to_vec(),
            repair_action_code_after_retry: after,
        }
    }

    fn adviser() -> RetryAdviser {
        RetryAdviser::new(codec(), 600)
    }

    #[test]
    fn retries_with_first_interval() {
        let ev = event(&params(2, &[5, 10], RepairActionCode::Unknown), &[FailureType::Connectivity]);
        assert!(adviser().can_advise(&ev).unwrap());
        assert_eq!(
            adviser().on_advise_event(&ev).unwrap(),
            AdviserResponse::Retry {
                retry_index: 1,
                wait_interval_secs: 5
            }
        );
    }

    #[test]
    fn last_interval_repeats() {
        let p = params(5, &[1, 2], RepairActionCode::Unknown);
        assert_eq!(RetryAdviser::wait_interval(&p, 0), 1);
        assert_eq!(RetryAdviser::wait_interval(&p, 1), 2);
        assert_eq!(RetryAdviser::wait_interval(&p, 4), 2);
        assert_eq!(
            RetryAdviser::wait_interval(&params(1, &[], RepairActionCode::Unknown), 0),
            0
        );
    }

    #[test]
    fn exhausted_retries_map_repair_action() {
        let mut ev = event(&params(1, &[], RepairActionCode::Ignore), &[]);
        ev.ambiance = ev.ambiance.with_retry_index(1).unwrap();
        assert_eq!(
            adviser().on_advise_event(&ev).unwrap(),
            AdviserResponse::IgnoreFailure
        );

        let mut ev = event(&params(1, &[], RepairActionCode::ManualIntervention), &[]);
        ev.ambiance = ev.ambiance.with_retry_index(1).unwrap();
        match adviser().on_advise_event(&ev).unwrap() {
            AdviserResponse::InterventionWait { timeout_secs, .. } => assert_eq!(timeout_secs, 600),
            other => panic!("unexpected response: {other:?}"),
        }

        let mut ev = event(&params(0, &[], RepairActionCode::OnFail), &[]);
        ev.ambiance = ev.ambiance.with_retry_index(0).unwrap();
        assert_eq!(adviser().on_advise_event(&ev).unwrap(), AdviserResponse::End);
    }

    #[test]
    fn declines_non_matching_failure_type() {
        let ev = event(&params(2, &[], RepairActionCode::Unknown), &[FailureType::Authorization]);
        assert!(!adviser().can_advise(&ev).unwrap());
    }

    #[test]
    fn declines_non_broke_or_expired() {
        let mut ev = event(&params(2, &[], RepairActionCode::Unknown), &[]);
        ev.to_status = Status::Succeeded;
        assert!(!adviser().can_advise(&ev).unwrap());

        let mut ev = event(&params(2, &[], RepairActionCode::Unknown), &[]);
        ev.previous_adviser_expired = true;
        assert!(!adviser().can_advise(&ev).unwrap());
    }

    #[test]
    fn malformed_parameters_are_an_error() {
        let ev = event(&serde_json::json!({ "retry_count": "x" }), &[]);
        assert!(matches!(
            adviser().can_advise(&ev),
            Err(AdviseError::InvalidParameters { .. })
        ));
    }
}
