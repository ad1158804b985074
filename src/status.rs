//! Client-facing projection of job state.
//!
//! [`StatusEndpoint`] never mutates the store; it turns a [`Job`] snapshot into
//! the [`StatusReport`] payload polled by clients. Unknown ids produce a
//! `success: false` report instead of a default job.

use serde::{Deserialize, Serialize};

use crate::state_machine::{Agent, Job, Stage};
use crate::store::JobStore;

/// Per-agent activity strings plus the failing agent, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentDetails {
    fn from_job(job: &Job) -> Self {
        let failing = job.error.as_ref().map(|e| e.failing_stage);
        let activity = |stage: Stage| -> String {
            let title = stage.agent().map(Agent::title).unwrap_or_default();
            if job.output(stage).is_some() {
                format!("{title} complete")
            } else if failing == Some(stage) {
                "Failed".to_string()
            } else if job.stage == stage {
                "In progress...".to_string()
            } else {
                "Waiting...".to_string()
            }
        };

        Self {
            research: Some(activity(Stage::Researching)),
            evaluation: Some(activity(Stage::Evaluating)),
            accessor: Some(activity(Stage::Reviewing)),
            report: Some(activity(Stage::Generating)),
            error_agent: job.error.as_ref().and_then(|e| e.agent()),
            error_message: job.error.as_ref().map(|e| e.detail.clone()),
        }
    }

    /// Activity string per agent, in pipeline order.
    pub fn activities(&self) -> [(Agent, Option<&str>); 4] {
        [
            (Agent::Research, self.research.as_deref()),
            (Agent::Evaluation, self.evaluation.as_deref()),
            (Agent::Accessor, self.accessor.as_deref()),
            (Agent::Report, self.report.as_deref()),
        ]
    }
}

/// Payload returned by the status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub success: bool,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub message: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_details: Option<AgentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_retry: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl StatusReport {
    pub fn not_found() -> Self {
        Self {
            success: false,
            progress: 0,
            status: None,
            message: "Report not found".to_string(),
            complete: false,
            agent_details: None,
            can_retry: None,
            retry_after: None,
        }
    }

    pub fn from_job(job: &Job) -> Self {
        let failed = job.stage == Stage::Failed;
        Self {
            success: true,
            progress: job.progress,
            status: Some(job.stage.status_label().to_string()),
            message: job.message.clone(),
            complete: job.stage == Stage::Complete,
            agent_details: Some(AgentDetails::from_job(job)),
            can_retry: failed.then(|| job.error.as_ref().is_some_and(|e| e.retryable)),
            retry_after: job.error.as_ref().and_then(|e| e.retry_after_secs),
        }
    }

    pub fn is_error(&self) -> bool {
        self.success && self.status.as_deref() == Some(Stage::Failed.status_label())
    }

    pub fn error_agent(&self) -> Option<Agent> {
        self.agent_details.as_ref().and_then(|d| d.error_agent)
    }
}

/// Read-only view over the job store for status queries.
#[derive(Debug, Clone)]
pub struct StatusEndpoint {
    store: JobStore,
}

impl StatusEndpoint {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    pub fn status(&self, id: &str) -> StatusReport {
        match self.store.get(id) {
            Ok(job) => StatusReport::from_job(&job),
            Err(_) => StatusReport::not_found(),
        }
    }
}
