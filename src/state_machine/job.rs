use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::stage::{Agent, Stage};
use crate::error::{FailureKind, StageError, StoreError};

/// Terminal failure attached to a job at FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub failing_stage: Stage,
    /// Non-technical message shown to the user.
    pub message: String,
    /// Underlying collaborator error.
    pub detail: String,
    pub retryable: bool,
    /// Set when the collaborator rejected us with a rate limit.
    pub retry_after_secs: Option<u64>,
}

impl JobError {
    /// Build the user-facing failure for an error that exhausted (or bypassed) the retry budget.
    pub fn from_stage_error(stage: Stage, error: &StageError) -> Self {
        let agent = stage.agent().map(Agent::name).unwrap_or("pipeline");
        let retryable = error.kind() == FailureKind::Transport;
        let message = if error.is_rate_limit() {
            "The AI service rate limit was reached. Please try again later.".to_string()
        } else if retryable {
            format!("The {agent} agent could not be reached. You can retry this step.")
        } else {
            format!("The {agent} agent could not process this address.")
        };

        Self {
            failing_stage: stage,
            message,
            detail: error.to_string(),
            retryable,
            retry_after_secs: error.retry_after_secs(),
        }
    }

    pub fn agent(&self) -> Option<Agent> {
        self.failing_stage.agent()
    }
}

/// A single mutation applied atomically by the job store.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Begin the given pipeline stage.
    Enter(Stage),
    /// Record the output of the current stage and advance progress to its checkpoint.
    Record { stage: Stage, output: Value },
    /// Replace the activity message without changing stage.
    Message(String),
    Complete,
    Fail(JobError),
}

/// One end-to-end report request and its accumulated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub input: String,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    pub stage_outputs: BTreeMap<Stage, Value>,
    pub error: Option<JobError>,
    /// Id of the failed job this one resumes, if any.
    pub resumed_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(input: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            input,
            stage: Stage::Queued,
            progress: 0,
            message: Stage::Queued.activity().to_string(),
            stage_outputs: BTreeMap::new(),
            error: None,
            resumed_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh job that reuses the outputs of stages that already completed
    /// in `previous`. Progress starts at the last seeded checkpoint.
    pub fn resumed(input: String, seeded: BTreeMap<Stage, Value>, previous: &str) -> Self {
        let mut job = Self::new(input);
        let mut progress = 0;
        for stage in Stage::PIPELINE {
            match seeded.get(&stage) {
                Some(output) => {
                    job.stage_outputs.insert(stage, output.clone());
                    progress = stage.checkpoint();
                }
                None => break,
            }
        }
        job.progress = progress;
        job.resumed_from = Some(previous.to_string());
        job.message = "Restarting report generation...".to_string();
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn output(&self, stage: Stage) -> Option<&Value> {
        self.stage_outputs.get(&stage)
    }

    /// Apply one update, enforcing the forward-only lifecycle.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), StoreError> {
        if self.is_terminal() {
            return Err(self.invalid("job is read-only"));
        }

        match update {
            JobUpdate::Enter(stage) => {
                if !stage.is_pipeline() || !self.stage.can_transition_to(stage) {
                    return Err(self.invalid(&format!("cannot move to {stage}")));
                }
                if let Some(previous) = stage.previous()
                    && previous.is_pipeline()
                    && !self.stage_outputs.contains_key(&previous)
                {
                    return Err(self.invalid(&format!("{previous} has no recorded output")));
                }
                self.stage = stage;
                self.message = stage.activity().to_string();
            }
            JobUpdate::Record { stage, output } => {
                if stage != self.stage || !stage.is_pipeline() {
                    return Err(self.invalid(&format!("cannot record output for {stage}")));
                }
                if self.stage_outputs.contains_key(&stage) {
                    return Err(self.invalid(&format!("{stage} output already recorded")));
                }
                self.stage_outputs.insert(stage, output);
                self.progress = self.progress.max(stage.checkpoint());
                if let Some(agent) = stage.agent() {
                    self.message = format!("{} complete", agent.title());
                }
            }
            JobUpdate::Message(message) => {
                self.message = message;
            }
            JobUpdate::Complete => {
                if !self.stage.can_transition_to(Stage::Complete) {
                    return Err(self.invalid("cannot complete before GENERATING"));
                }
                if let Some(missing) = Stage::PIPELINE
                    .iter()
                    .find(|s| !self.stage_outputs.contains_key(*s))
                {
                    return Err(self.invalid(&format!("{missing} has no recorded output")));
                }
                self.stage = Stage::Complete;
                self.progress = 100;
                self.message = Stage::Complete.activity().to_string();
            }
            JobUpdate::Fail(error) => {
                if error.failing_stage != self.stage {
                    return Err(self.invalid(&format!(
                        "cannot fail {} while at {}",
                        error.failing_stage, self.stage
                    )));
                }
                if self.stage_outputs.contains_key(&error.failing_stage) {
                    return Err(self.invalid(&format!(
                        "{} already completed and cannot fail",
                        error.failing_stage
                    )));
                }
                self.stage = Stage::Failed;
                self.message = error.message.clone();
                self.error = Some(error);
            }
        }

        self.touch();
        Ok(())
    }

    // updated_at must strictly increase per mutation even within one clock tick.
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }

    fn invalid(&self, reason: &str) -> StoreError {
        StoreError::InvalidTransition {
            id: self.id.clone(),
            from: self.stage,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn walk_to(job: &mut Job, last: Stage) {
        for stage in Stage::PIPELINE {
            job.apply(JobUpdate::Enter(stage)).unwrap();
            if stage == last {
                return;
            }
            job.apply(JobUpdate::Record {
                stage,
                output: json!({ "stage": stage }),
            })
            .unwrap();
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("10 Downing Street, London, SW1A 2AA".into());
        assert_eq!(job.stage, Stage::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.stage_outputs.is_empty());
        assert!(job.error.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn happy_path_reaches_complete() {
        let mut job = Job::new("addr".into());
        walk_to(&mut job, Stage::Generating);
        job.apply(JobUpdate::Record {
            stage: Stage::Generating,
            output: json!({}),
        })
        .unwrap();
        assert_eq!(job.progress, 100);

        job.apply(JobUpdate::Complete).unwrap();
        assert_eq!(job.stage, Stage::Complete);
        assert_eq!(job.stage_outputs.len(), 4);
    }

    #[test]
    fn record_advances_progress_to_checkpoint() {
        let mut job = Job::new("addr".into());
        job.apply(JobUpdate::Enter(Stage::Researching)).unwrap();
        assert_eq!(job.progress, 0);
        job.apply(JobUpdate::Record {
            stage: Stage::Researching,
            output: json!({}),
        })
        .unwrap();
        assert_eq!(job.progress, 25);
        assert_eq!(job.message, "Research complete");
    }

    #[test]
    fn entering_next_stage_requires_recorded_output() {
        let mut job = Job::new("addr".into());
        job.apply(JobUpdate::Enter(Stage::Researching)).unwrap();
        let err = job.apply(JobUpdate::Enter(Stage::Evaluating)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut job = Job::new("addr".into());
        assert!(job.apply(JobUpdate::Enter(Stage::Evaluating)).is_err());
        assert_eq!(job.stage, Stage::Queued);
    }

    #[test]
    fn output_written_at_most_once() {
        let mut job = Job::new("addr".into());
        job.apply(JobUpdate::Enter(Stage::Researching)).unwrap();
        job.apply(JobUpdate::Record {
            stage: Stage::Researching,
            output: json!({"v": 1}),
        })
        .unwrap();
        let err = job
            .apply(JobUpdate::Record {
                stage: Stage::Researching,
                output: json!({"v": 2}),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(job.output(Stage::Researching), Some(&json!({"v": 1})));
    }

    #[test]
    fn complete_requires_all_outputs() {
        let mut job = Job::new("addr".into());
        walk_to(&mut job, Stage::Generating);
        assert!(job.apply(JobUpdate::Complete).is_err());
    }

    #[test]
    fn failed_job_is_read_only() {
        let mut job = Job::new("addr".into());
        walk_to(&mut job, Stage::Evaluating);
        let error = JobError::from_stage_error(
            Stage::Evaluating,
            &StageError::Timeout(std::time::Duration::from_secs(1)),
        );
        job.apply(JobUpdate::Fail(error)).unwrap();

        assert_eq!(job.stage, Stage::Failed);
        assert_eq!(job.progress, 25);
        assert!(job.output(Stage::Researching).is_some());
        assert!(job.output(Stage::Evaluating).is_none());
        assert!(job.apply(JobUpdate::Message("again".into())).is_err());
        assert!(job.apply(JobUpdate::Enter(Stage::Reviewing)).is_err());
    }

    #[test]
    fn fail_must_name_current_stage() {
        let mut job = Job::new("addr".into());
        walk_to(&mut job, Stage::Evaluating);
        let error = JobError::from_stage_error(
            Stage::Reviewing,
            &StageError::Fatal("boom".into()),
        );
        let err = job.apply(JobUpdate::Fail(error)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: Stage::Evaluating,
                ..
            }
        ));
        assert_eq!(job.stage, Stage::Evaluating);
        assert!(job.error.is_none());

        let error = JobError::from_stage_error(
            Stage::Researching,
            &StageError::Fatal("boom".into()),
        );
        assert!(job.apply(JobUpdate::Fail(error)).is_err());
        assert_eq!(job.stage, Stage::Evaluating);
    }

    #[test]
    fn updated_at_strictly_increases() {
        let mut job = Job::new("addr".into());
        let mut last = job.updated_at;
        for i in 0..50 {
            job.apply(JobUpdate::Message(format!("tick {i}"))).unwrap();
            assert!(job.updated_at > last);
            last = job.updated_at;
        }
    }

    #[test]
    fn job_error_classification() {
        let transport = JobError::from_stage_error(
            Stage::Evaluating,
            &StageError::Timeout(std::time::Duration::from_secs(1)),
        );
        assert!(transport.retryable);
        assert_eq!(transport.agent(), Some(Agent::Evaluation));
        assert!(transport.message.contains("retry"));

        let fatal = JobError::from_stage_error(
            Stage::Reviewing,
            &StageError::Fatal("invalid api key".into()),
        );
        assert!(!fatal.retryable);
        assert!(fatal.message.contains("could not process"));
        assert_eq!(fatal.detail, "invalid api key");

        let limited = JobError::from_stage_error(
            Stage::Researching,
            &StageError::Transport {
                message: "429".into(),
                retry_after_secs: Some(60),
            },
        );
        assert_eq!(limited.retry_after_secs, Some(60));
        assert!(limited.message.contains("rate limit"));
    }

    #[test]
    fn resumed_job_seeds_prior_outputs() {
        let mut seeded = BTreeMap::new();
        seeded.insert(Stage::Researching, json!({"r": 1}));
        let job = Job::resumed("addr".into(), seeded, "old-id");

        assert_eq!(job.stage, Stage::Queued);
        assert_eq!(job.progress, 25);
        assert_eq!(job.resumed_from.as_deref(), Some("old-id"));
        assert_eq!(job.output(Stage::Researching), Some(&json!({"r": 1})));
    }

    #[test]
    fn resumed_job_ignores_outputs_after_a_gap() {
        let mut seeded = BTreeMap::new();
        seeded.insert(Stage::Evaluating, json!({}));
        let job = Job::resumed("addr".into(), seeded, "old-id");
        assert!(job.stage_outputs.is_empty());
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let mut job = Job::new("Serialize me".into());
        job.apply(JobUpdate::Enter(Stage::Researching)).unwrap();
        job.apply(JobUpdate::Record {
            stage: Stage::Researching,
            output: json!({"k": "v"}),
        })
        .unwrap();
        let json = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.output(Stage::Researching), Some(&json!({"k": "v"})));
    }
}
