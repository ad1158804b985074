//! Client-side status polling.
//!
//! [`ClientPoller`] queries a [`StatusSource`] at a fixed interval until the job
//! completes or fails. Poll transport failures are absorbed by an explicit
//! [`Backoff`]; they never become job failures. Once the retry budget runs out
//! the poller reports a connectivity outcome instead.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PollError;
use crate::status::StatusReport;

/// Anything that can answer a status query for a job id.
pub trait StatusSource: Send + Sync {
    fn fetch_status(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<StatusReport, PollError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between polls while the connection is healthy.
    pub interval: Duration,
    /// Consecutive failed polls tolerated before giving up.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Backoff state for consecutive poll failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
    attempt: u32,
    next_delay: Duration,
}

impl Backoff {
    pub fn new(policy: &PollPolicy) -> Self {
        Self {
            base: policy.base_backoff,
            max: policy.max_backoff,
            max_retries: policy.max_retries,
            attempt: 0,
            next_delay: policy.base_backoff,
        }
    }

    /// Consecutive failures recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Record a failed poll. Returns the delay before the next poll, or `None`
    /// once the failure count exceeds the retry budget.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.max_retries {
            return None;
        }
        let delay = self.next_delay;
        let factor = 2u32.saturating_pow(self.attempt);
        self.next_delay = self.base.saturating_mul(factor).min(self.max);
        Some(delay.min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.base;
    }
}

/// How a polling session ended.
#[derive(Debug)]
pub enum PollOutcome {
    Complete(StatusReport),
    /// The job failed. `can_retry` says whether the failing stage may be resubmitted.
    Failed {
        report: StatusReport,
        can_retry: bool,
    },
    NotFound,
    /// The status endpoint stayed unreachable; the job itself may still be running.
    Connectivity(PollError),
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ClientPoller {
    policy: PollPolicy,
}

impl ClientPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Poll `id` until a terminal outcome, calling `on_update` with every
    /// successful status report.
    pub async fn run<S, F>(
        &self,
        source: &S,
        id: &str,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> PollOutcome
    where
        S: StatusSource,
        F: FnMut(&StatusReport),
    {
        let mut backoff = Backoff::new(&self.policy);

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                result = source.fetch_status(id) => result,
            };

            let delay = match result {
                Ok(report) => {
                    backoff.reset();
                    if !report.success {
                        return PollOutcome::NotFound;
                    }
                    on_update(&report);
                    if report.complete {
                        return PollOutcome::Complete(report);
                    }
                    if report.is_error() {
                        let can_retry = report.can_retry.unwrap_or(false);
                        return PollOutcome::Failed { report, can_retry };
                    }
                    debug!(id, progress = report.progress, "Polled job status");
                    self.policy.interval
                }
                Err(err) => match backoff.on_failure() {
                    Some(delay) => {
                        warn!(
                            id,
                            attempt = backoff.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            "Status poll failed: {err}"
                        );
                        delay
                    }
                    None => {
                        return PollOutcome::Connectivity(PollError::Exhausted {
                            attempts: backoff.attempt(),
                            last: err.to_string(),
                        });
                    }
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
