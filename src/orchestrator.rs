use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::address;
use crate::agents::StageContext;
use crate::error::{AddressError, StageError, StoreError};
use crate::runner::StageRunner;
use crate::state_machine::{
    Job, JobError, JobUpdate, RetryConfig, Stage, StageAttempts, StageMachine, Transition,
};
use crate::store::JobStore;

/// Drives report jobs through the four pipeline stages.
///
/// Cloning is cheap; every clone shares the same [`JobStore`] and agents.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    store: JobStore,
    runner: StageRunner,
    retry: RetryConfig,
}

enum StageOutcome {
    Recorded(serde_json::Value),
    Failed(JobError),
}

impl PipelineOrchestrator {
    pub fn new(store: JobStore, runner: StageRunner, retry: RetryConfig) -> Self {
        Self {
            store,
            runner,
            retry,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Validate the address, create a job and start it in the background.
    ///
    /// Returns as soon as the job exists; no collaborator is called on this path.
    pub fn submit(&self, raw_address: &str) -> Result<String, AddressError> {
        let address = address::validate(raw_address)?;
        let id = self.store.create(address.formatted);
        info!(job_id = %id, postcode = %address.postcode, "report job created");
        self.spawn(id.clone());
        Ok(id)
    }

    /// Resubmit a retryable failure as a new job that reuses the stages
    /// already completed by `id`. The failed job itself stays FAILED.
    pub fn retry(&self, id: &str) -> Result<String, StoreError> {
        let job = self.store.get(id)?;
        let retryable = job.stage == Stage::Failed && job.error.as_ref().is_some_and(|e| e.retryable);
        if !retryable {
            return Err(StoreError::NotRetryable(id.to_string()));
        }

        let new_id = self
            .store
            .create_resumed(job.input.clone(), job.stage_outputs.clone(), id);
        info!(
            job_id = %new_id,
            resumed_from = %id,
            reused_stages = job.stage_outputs.len(),
            "report job resubmitted"
        );
        self.spawn(new_id.clone());
        Ok(new_id)
    }

    fn spawn(&self, id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_job(&id).await {
                error!(job_id = %id, error = %e, "pipeline aborted");
                this.abort(&id, &e);
            }
        });
    }

    /// Best-effort FAILED marking for a job whose pipeline stopped on a store
    /// error, so pollers and the sweeper see a terminal job.
    fn abort(&self, id: &str, cause: &StoreError) {
        let Ok(mut job) = self.store.get(id) else {
            return;
        };
        if job.is_terminal() {
            return;
        }

        // A failure must name a stage without output; step past a finished one.
        if job.output(job.stage).is_some()
            && let Some(next) = job.stage.next().filter(|s| s.is_pipeline())
        {
            match self.store.update(id, JobUpdate::Enter(next)) {
                Ok(entered) => job = entered,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "could not mark aborted job as failed");
                    return;
                }
            }
        }

        let failure = JobError::from_stage_error(
            job.stage,
            &StageError::Fatal(format!("pipeline aborted: {cause}")),
        );
        if let Err(e) = self.store.update(id, JobUpdate::Fail(failure)) {
            warn!(job_id = %id, error = %e, "could not mark aborted job as failed");
        }
    }

    /// Run every stage of a job in order, returning the terminal snapshot.
    ///
    /// Stages whose output is already recorded (resumed jobs) are entered but
    /// not re-invoked.
    pub async fn run_job(&self, id: &str) -> Result<Job, StoreError> {
        for stage in Stage::PIPELINE {
            let job = self.store.update(id, JobUpdate::Enter(stage))?;
            if job.output(stage).is_some() {
                debug!(job_id = %id, %stage, "reusing recorded stage output");
                continue;
            }

            match self.run_stage(&job, stage).await? {
                StageOutcome::Recorded(output) => {
                    self.store.update(id, JobUpdate::Record { stage, output })?;
                    debug!(job_id = %id, %stage, "stage complete");
                }
                StageOutcome::Failed(failure) => {
                    warn!(
                        job_id = %id,
                        %stage,
                        retryable = failure.retryable,
                        detail = %failure.detail,
                        "stage failed"
                    );
                    return self.store.update(id, JobUpdate::Fail(failure));
                }
            }
        }

        let job = self.store.update(id, JobUpdate::Complete)?;
        info!(job_id = %id, "report job complete");
        Ok(job)
    }

    async fn run_stage(&self, job: &Job, stage: Stage) -> Result<StageOutcome, StoreError> {
        let ctx = StageContext::for_stage(job, stage);
        let mut attempts = StageAttempts::new(stage);

        loop {
            let outcome = self.runner.attempt(stage, &ctx).await;
            match StageMachine::next(&self.retry, &mut attempts, outcome) {
                Transition::Done(output) => return Ok(StageOutcome::Recorded(output)),
                Transition::Retry {
                    attempt,
                    budget,
                    delay,
                    reason,
                } => {
                    log_retry(&job.id, stage, attempt, budget, &reason.to_string(), delay.as_millis());
                    self.store.update(
                        &job.id,
                        JobUpdate::Message(format!(
                            "{} (attempt {attempt}/{budget})",
                            stage.activity()
                        )),
                    )?;
                    sleep(delay).await;
                }
                Transition::Fail(failure) => return Ok(StageOutcome::Failed(failure)),
            }
        }
    }
}

fn log_retry(job_id: &str, stage: Stage, attempt: u32, budget: u32, reason: &str, delay_ms: u128) {
    warn!(
        job_id,
        %stage,
        attempt,
        budget,
        delay_ms = delay_ms as u64,
        reason,
        "retrying stage"
    );
}
