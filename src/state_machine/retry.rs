use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::JobError;
use super::stage::Stage;
use crate::error::{FailureKind, StageError};

/// Configuration for retry behavior within a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed for transport failures (timeouts, network, rate limits).
    pub max_attempts: u32,
    /// Attempts allowed for malformed or rejected collaborator output.
    pub semantic_max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            semantic_max_attempts: 2,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    fn budget(&self, kind: FailureKind) -> u32 {
        match kind {
            FailureKind::Transport => self.max_attempts,
            FailureKind::Semantic => self.semantic_max_attempts,
            FailureKind::Fatal => 1,
        }
    }
}

/// Failure counters for the stage currently being attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAttempts {
    pub stage: Stage,
    pub transport_failures: u32,
    pub semantic_failures: u32,
}

impl StageAttempts {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            transport_failures: 0,
            semantic_failures: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.transport_failures + self.semantic_failures
    }
}

/// The result of evaluating one stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The stage produced its output.
    Done(Value),
    /// Try the same stage again after `delay`.
    Retry {
        attempt: u32,
        budget: u32,
        delay: Duration,
        reason: StageError,
    },
    /// Give up on this stage; the job fails.
    Fail(JobError),
}

/// Decides what happens after each collaborator attempt.
pub struct StageMachine;

impl StageMachine {
    /// Compute the transition for the given outcome, updating the attempt counters.
    ///
    /// - Success always yields `Done`.
    /// - Transport and semantic failures retry until their own budget is spent.
    /// - Fatal failures never retry.
    pub fn next(
        config: &RetryConfig,
        attempts: &mut StageAttempts,
        outcome: Result<Value, StageError>,
    ) -> Transition {
        let error = match outcome {
            Ok(output) => return Transition::Done(output),
            Err(error) => error,
        };

        let kind = error.kind();
        let failures = match kind {
            FailureKind::Transport => {
                attempts.transport_failures += 1;
                attempts.transport_failures
            }
            FailureKind::Semantic => {
                attempts.semantic_failures += 1;
                attempts.semantic_failures
            }
            FailureKind::Fatal => {
                return Transition::Fail(JobError::from_stage_error(attempts.stage, &error));
            }
        };

        let budget = config.budget(kind);
        if failures < budget {
            let backoff = config.delay_for_attempt(attempts.total());
            let delay_ms = match error.retry_after_secs() {
                Some(secs) => backoff.max(secs.saturating_mul(1000)),
                None => backoff,
            };
            Transition::Retry {
                attempt: failures + 1,
                budget,
                delay: Duration::from_millis(delay_ms),
                reason: error,
            }
        } else {
            Transition::Fail(JobError::from_stage_error(attempts.stage, &error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timeout() -> StageError {
        StageError::Timeout(Duration::from_secs(30))
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(200), u64::MAX);
    }

    #[test]
    fn success_is_done() {
        let mut attempts = StageAttempts::new(Stage::Researching);
        let t = StageMachine::next(&RetryConfig::default(), &mut attempts, Ok(json!({"a": 1})));
        assert_eq!(t, Transition::Done(json!({"a": 1})));
        assert_eq!(attempts.total(), 0);
    }

    #[test]
    fn transport_failure_retries_then_fails_retryable() {
        let config = RetryConfig::default();
        let mut attempts = StageAttempts::new(Stage::Evaluating);

        let t = StageMachine::next(&config, &mut attempts, Err(timeout()));
        assert!(matches!(
            t,
            Transition::Retry { attempt: 2, budget: 3, .. }
        ));

        let t = StageMachine::next(&config, &mut attempts, Err(timeout()));
        match t {
            Transition::Retry { attempt, delay, .. } => {
                assert_eq!(attempt, 3);
                assert_eq!(delay, Duration::from_millis(2000));
            }
            other => panic!("expected retry, got {other:?}"),
        }

        // Third consecutive timeout exhausts the budget.
        let t = StageMachine::next(&config, &mut attempts, Err(timeout()));
        match t {
            Transition::Fail(err) => {
                assert_eq!(err.failing_stage, Stage::Evaluating);
                assert!(err.retryable);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn semantic_failure_has_smaller_budget_and_is_not_retryable() {
        let config = RetryConfig::default();
        let mut attempts = StageAttempts::new(Stage::Reviewing);
        let rejected = || StageError::Semantic("approval_status was Rejected".into());

        let t = StageMachine::next(&config, &mut attempts, Err(rejected()));
        assert!(matches!(t, Transition::Retry { budget: 2, .. }));

        let t = StageMachine::next(&config, &mut attempts, Err(rejected()));
        match t {
            Transition::Fail(err) => assert!(!err.retryable),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn fatal_failure_fails_immediately() {
        let mut attempts = StageAttempts::new(Stage::Researching);
        let t = StageMachine::next(
            &RetryConfig::default(),
            &mut attempts,
            Err(StageError::Fatal("API error (status 401)".into())),
        );
        match t {
            Transition::Fail(err) => {
                assert!(!err.retryable);
                assert_eq!(err.failing_stage, Stage::Researching);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn retry_then_succeed() {
        let config = RetryConfig::default();
        let mut attempts = StageAttempts::new(Stage::Generating);

        let t = StageMachine::next(&config, &mut attempts, Err(StageError::transport("reset")));
        assert!(matches!(t, Transition::Retry { .. }));

        let t = StageMachine::next(&config, &mut attempts, Ok(json!({})));
        assert_eq!(t, Transition::Done(json!({})));
    }

    #[test]
    fn rate_limit_waits_at_least_retry_after() {
        let config = RetryConfig::default();
        let mut attempts = StageAttempts::new(Stage::Researching);
        let t = StageMachine::next(
            &config,
            &mut attempts,
            Err(StageError::Transport {
                message: "rate limited".into(),
                retry_after_secs: Some(10),
            }),
        );
        match t {
            Transition::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(10)),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn single_attempt_budget_fails_immediately() {
        let config = RetryConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let mut attempts = StageAttempts::new(Stage::Researching);
        let t = StageMachine::next(&config, &mut attempts, Err(timeout()));
        assert!(matches!(t, Transition::Fail(_)));
    }
}
