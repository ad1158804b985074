use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{StageAgent, StageContext, required_fields};
use crate::anthropic::{AnthropicError, Message, MessageSender, MessagesRequest};
use crate::error::StageError;
use crate::state_machine::{Agent, Stage};

/// Stage agents backed by one Messages API call each.
pub struct LlmAgents<S> {
    client: S,
    model: String,
    max_tokens: u32,
}

impl<S: MessageSender> LlmAgents<S> {
    pub fn new(client: S, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 4096,
        }
    }

    fn request(&self, agent: Agent, ctx: &StageContext) -> MessagesRequest {
        let fields = required_fields(agent).join(", ");
        let prior = match agent {
            Agent::Research => Value::Null,
            Agent::Evaluation => json!({ "property_data": ctx.output(Stage::Researching) }),
            Agent::Accessor => json!({
                "property_data": ctx.output(Stage::Researching),
                "evaluation_results": ctx.output(Stage::Evaluating),
            }),
            Agent::Report => json!({ "approved_data": ctx.output(Stage::Reviewing) }),
        };

        let mut content = format!(
            "Property address: {}\n\n\
             Respond with ONLY a valid JSON object, no other text.\n\
             The object must contain: {fields}.\n",
            ctx.address
        );
        match agent {
            Agent::Accessor => content.push_str(
                "Set approval_status to \"Approved\" only if the data is consistent; \
                 otherwise \"Rejected\" with a `reasons` list.\n",
            ),
            Agent::Report => content.push_str(
                "sections must be a list of {\"heading\": string, \"body\": string}.\n",
            ),
            Agent::Research | Agent::Evaluation => {}
        }
        if !prior.is_null() {
            content.push_str("\nInput data:\n");
            content.push_str(&prior.to_string());
        }

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(system_prompt(agent).to_string()),
            messages: vec![Message::user(content)],
        }
    }
}

#[async_trait]
impl<S: MessageSender> StageAgent for LlmAgents<S> {
    async fn run(&self, agent: Agent, ctx: &StageContext) -> Result<Value, StageError> {
        let req = self.request(agent, ctx);
        debug!(%agent, model = %req.model, "sending stage request");

        let response = self
            .client
            .send_message(&req)
            .await
            .map_err(classify)?;

        if response.truncated() {
            return Err(StageError::Semantic(format!(
                "{agent} response was cut off at max_tokens"
            )));
        }
        extract_json(&response.text())
    }
}

fn system_prompt(agent: Agent) -> &'static str {
    match agent {
        Agent::Research => {
            "You are a UK property research agent. Gather property details, \
             market data, local area information and planning history."
        }
        Agent::Evaluation => {
            "You are a UK property evaluation agent. Produce a valuation, \
             feasibility notes and a risk assessment from the research data."
        }
        Agent::Accessor => {
            "You are a critical reviewer. Check the research and evaluation data \
             for consistency and approve or reject it."
        }
        Agent::Report => {
            "You are a report writer. Turn approved property data into a \
             structured build-to-rent valuation report."
        }
    }
}

fn classify(err: AnthropicError) -> StageError {
    match err {
        AnthropicError::RateLimited { retry_after_ms } => StageError::Transport {
            message: "rate limited by the AI service".to_string(),
            retry_after_secs: Some(retry_after_ms.div_ceil(1000)),
        },
        other if other.is_transient() => StageError::transport(other.to_string()),
        other => StageError::Fatal(other.to_string()),
    }
}

/// Pull the first JSON object out of a model reply, tolerating code fences and prose.
fn extract_json(text: &str) -> Result<Value, StageError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let candidate = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(StageError::Semantic(
                "response did not contain a JSON object".to_string(),
            ));
        }
    };
    serde_json::from_str(candidate)
        .map_err(|e| StageError::Semantic(format!("response was not valid JSON: {e}")))
}
