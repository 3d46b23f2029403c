//! Structural steps: nodes whose only job is to run other nodes.
//!
//! - `SECTION` runs one child (`Child` mode).
//! - `SECTION_CHAIN` runs its children one after another (`ChildChain` mode),
//!   optionally suspending before a given child until an external resume.
//! - `FORK` runs all children at once (`Children` mode).
//!
//! Each finishes with a status derived from its children: succeeded if every
//! child ended positive, otherwise the first broke child's status.

use std::collections::BTreeSet;

use conductor_types::execution::{ExecutableResponse, FailureInfo, Status};
use conductor_types::notify::ResponseMap;
use serde::Deserialize;

use super::{Step, StepContext, StepError, StepOutput, StepResult};
use crate::waiter::accumulate::child_summaries;

pub const SECTION: &str = "SECTION";
pub const SECTION_CHAIN: &str = "SECTION_CHAIN";
pub const FORK: &str = "FORK";

/// Derive a structural node's result from its children's summaries.
pub fn summarize_children(responses: &ResponseMap) -> StepResult {
    let summaries = child_summaries(responses);
    let unsuccessful: Vec<_> = summaries
        .iter()
        .filter(|s| !s.status.is_positive())
        .collect();
    if unsuccessful.is_empty() {
        return StepResult::succeeded();
    }

    let status = unsuccessful
        .iter()
        .find(|s| s.status.is_broke())
        .map(|s| s.status)
        .or_else(|| {
            unsuccessful
                .iter()
                .find(|s| s.status.is_final())
                .map(|s| s.status)
        })
        .unwrap_or(Status::Errored);

    let mut messages = Vec::with_capacity(unsuccessful.len());
    let mut failure_types = BTreeSet::new();
    for child in &unsuccessful {
        match &child.failure_info {
            Some(info) => {
                messages.push(format!("{}: {}", child.identifier, info.error_message));
                failure_types.extend(info.failure_types.iter().copied());
            }
            None => messages.push(format!("{}: ended {}", child.identifier, child.status)),
        }
    }

    StepResult::failed(
        status,
        FailureInfo {
            error_message: messages.join("; "),
            failure_types,
        },
    )
}

// ---------------------------------------------------------------------------
// SECTION
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SectionParameters {
    child: String,
}

pub struct SectionStep;

impl Step for SectionStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: SectionParameters = ctx.parameters_as()?;
        Ok(StepOutput::Child {
            child_node_id: params.child,
        })
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        Ok(StepOutput::Done(summarize_children(&responses)))
    }
}

// ---------------------------------------------------------------------------
// FORK
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForkParameters {
    #[serde(default)]
    children: Vec<String>,
}

pub struct ForkStep;

impl Step for ForkStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: ForkParameters = ctx.parameters_as()?;
        if params.children.is_empty() {
            return Ok(StepOutput::Done(StepResult::succeeded()));
        }
        Ok(StepOutput::Children {
            child_node_ids: params.children,
        })
    }

    async fn resume(
        &self,
        _ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        Ok(StepOutput::Done(summarize_children(&responses)))
    }
}

// ---------------------------------------------------------------------------
// SECTION_CHAIN
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChainParameters {
    #[serde(default)]
    children: Vec<String>,
    /// Suspend before starting the child at this index.
    #[serde(default)]
    suspend_before: Option<usize>,
}

impl ChainParameters {
    fn link(&self, index: usize) -> StepOutput {
        StepOutput::ChildChain {
            next_child_id: Some(self.children[index].clone()),
            suspend: false,
            last_link: index + 1 == self.children.len(),
        }
    }

    fn suspension() -> StepOutput {
        StepOutput::ChildChain {
            next_child_id: None,
            suspend: true,
            last_link: false,
        }
    }
}

/// Number of chain links that started a child.
fn started_links(ctx: &StepContext) -> usize {
    ctx.executable_responses
        .iter()
        .filter(|r| {
            matches!(
                r,
                ExecutableResponse::ChildChain {
                    next_child_id: Some(_),
                    ..
                }
            )
        })
        .count()
}

fn resumed_from_suspension(ctx: &StepContext) -> bool {
    matches!(
        ctx.executable_responses.last(),
        Some(ExecutableResponse::ChildChain { suspend: true, .. })
    )
}

pub struct SectionChainStep;

impl Step for SectionChainStep {
    async fn start(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let params: ChainParameters = ctx.parameters_as()?;
        if params.children.is_empty() {
            return Ok(StepOutput::Done(StepResult::succeeded()));
        }
        if params.suspend_before == Some(0) {
            return Ok(ChainParameters::suspension());
        }
        Ok(params.link(0))
    }

    async fn resume(
        &self,
        ctx: &StepContext,
        responses: ResponseMap,
    ) -> Result<StepOutput, StepError> {
        let params: ChainParameters = ctx.parameters_as()?;

        let summary = summarize_children(&responses);
        if summary.status != Status::Succeeded {
            return Ok(StepOutput::Done(summary));
        }

        let started = started_links(ctx);
        if started >= params.children.len() {
            return Ok(StepOutput::Done(StepResult::succeeded()));
        }
        if !resumed_from_suspension(ctx) && params.suspend_before == Some(started) {
            return Ok(ChainParameters::suspension());
        }
        Ok(params.link(started))
    }
}
