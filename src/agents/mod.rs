//! Stage collaborators: one agent call per pipeline stage.
//!
//! [`StageAgent`] is the seam between the orchestrator and whatever produces a
//! stage's output. [`LlmAgents`] calls the Anthropic Messages API;
//! [`OfflineAgents`] produces deterministic placeholder data when no API key is
//! configured.

mod llm;
mod offline;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StageError;
use crate::state_machine::{Agent, Job, Stage};

pub use llm::LlmAgents;
pub use offline::OfflineAgents;

/// Everything a stage may see: the address and the outputs of earlier stages
/// of the same job.
#[derive(Debug, Clone, PartialEq)]
pub struct StageContext {
    pub address: String,
    pub prior: BTreeMap<Stage, Value>,
}

impl StageContext {
    /// Collect the outputs recorded strictly before `stage`.
    pub fn for_stage(job: &Job, stage: Stage) -> Self {
        let prior = job
            .stage_outputs
            .iter()
            .filter(|(s, _)| **s < stage)
            .map(|(s, v)| (*s, v.clone()))
            .collect();
        Self {
            address: job.input.clone(),
            prior,
        }
    }

    pub fn output(&self, stage: Stage) -> Option<&Value> {
        self.prior.get(&stage)
    }
}

#[async_trait]
pub trait StageAgent: Send + Sync {
    async fn run(&self, agent: Agent, ctx: &StageContext) -> Result<Value, StageError>;
}

/// Fields each agent's output must carry.
pub fn required_fields(agent: Agent) -> &'static [&'static str] {
    match agent {
        Agent::Research => &["property_details", "market_data"],
        Agent::Evaluation => &["current_valuation", "risk_assessment"],
        Agent::Accessor => &["approval_status"],
        Agent::Report => &["title", "sections"],
    }
}

/// Structural checks applied to every collaborator output.
///
/// The accessor must explicitly approve; anything else is a semantic rejection.
pub fn check_output(agent: Agent, output: &Value) -> Result<(), StageError> {
    let object = output
        .as_object()
        .ok_or_else(|| StageError::Semantic(format!("{agent} output is not a JSON object")))?;

    if let Some(missing) = required_fields(agent)
        .iter()
        .find(|field| object.get(**field).is_none_or(Value::is_null))
    {
        return Err(StageError::Semantic(format!(
            "{agent} output is missing `{missing}`"
        )));
    }

    match agent {
        Agent::Accessor => {
            let status = object
                .get("approval_status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !status.eq_ignore_ascii_case("approved") {
                return Err(StageError::Semantic(format!(
                    "accessor did not approve the data (approval_status: {status:?})"
                )));
            }
        }
        Agent::Report => {
            let sections = object.get("sections").and_then(Value::as_array);
            if sections.is_none_or(|s| s.is_empty()) {
                return Err(StageError::Semantic(
                    "report output has no sections".to_string(),
                ));
            }
        }
        Agent::Research | Agent::Evaluation => {}
    }

    Ok(())
}
