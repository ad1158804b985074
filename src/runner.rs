use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::agents::{StageAgent, StageContext, check_output};
use crate::error::StageError;
use crate::state_machine::Stage;

/// Executes a single attempt of one pipeline stage.
///
/// Every call carries a hard deadline; exceeding it is reported as
/// [`StageError::Timeout`], which the retry policy treats as a transport failure.
#[derive(Clone)]
pub struct StageRunner {
    agents: Arc<dyn StageAgent>,
    timeout: Duration,
}

impl StageRunner {
    pub fn new(agents: Arc<dyn StageAgent>, timeout: Duration) -> Self {
        Self { agents, timeout }
    }

    pub async fn attempt(&self, stage: Stage, ctx: &StageContext) -> Result<Value, StageError> {
        let agent = stage
            .agent()
            .ok_or_else(|| StageError::Fatal(format!("{stage} has no collaborator")))?;

        let output = match timeout(self.timeout, self.agents.run(agent, ctx)).await {
            Ok(result) => result?,
            Err(_) => return Err(StageError::Timeout(self.timeout)),
        };
        check_output(agent, &output)?;
        Ok(output)
    }
}
