use std::time::Duration;

use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::state_machine::Stage;

#[derive(Debug, Error)]
pub enum PropvalError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Anthropic API error: {0}")]
    Anthropic(#[from] AnthropicError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Submission input rejected before a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Address is required")]
    Empty,

    #[error("Please enter a complete UK address")]
    TooShort,

    #[error("Address does not contain a valid UK postcode")]
    MissingPostcode,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Report not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for job {id} at {from}: {reason}")]
    InvalidTransition {
        id: String,
        from: Stage,
        reason: String,
    },

    #[error("Job {0} is still running")]
    StillRunning(String),

    #[error("Job {0} cannot be retried")]
    NotRetryable(String),

    #[error("Report {id} is not ready yet (status: {stage})")]
    NotReady { id: String, stage: Stage },

    #[error("Report {0} could not be rendered")]
    Unrenderable(String),
}

/// Classifies a stage failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, timeout, rate limit or upstream 5xx.
    Transport,
    /// The collaborator answered but the output failed structural checks.
    Semantic,
    /// Unrecoverable; never retried.
    Fatal,
}

/// Error returned by a stage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("collaborator unreachable: {message}")]
    Transport {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed collaborator response: {0}")]
    Semantic(String),

    #[error("{0}")]
    Fatal(String),
}

impl StageError {
    pub fn transport(message: impl Into<String>) -> Self {
        StageError::Transport {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Transport { .. } | StageError::Timeout(_) => FailureKind::Transport,
            StageError::Semantic(_) => FailureKind::Semantic,
            StageError::Fatal(_) => FailureKind::Fatal,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            StageError::Transport {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.retry_after_secs().is_some()
    }
}

/// Failure between the polling client and the status endpoint. Never stored in a job.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("status request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("status endpoint returned HTTP {0}")]
    Status(u16),

    #[error("gave up after {attempts} failed status requests: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_classification() {
        assert_eq!(
            StageError::transport("connection reset").kind(),
            FailureKind::Transport
        );
        assert_eq!(
            StageError::Timeout(Duration::from_secs(5)).kind(),
            FailureKind::Transport
        );
        assert_eq!(
            StageError::Semantic("missing field".into()).kind(),
            FailureKind::Semantic
        );
        assert_eq!(
            StageError::Fatal("bad key".into()).kind(),
            FailureKind::Fatal
        );
    }

    #[test]
    fn rate_limit_detected_from_retry_after() {
        let err = StageError::Transport {
            message: "429".into(),
            retry_after_secs: Some(60),
        };
        assert!(err.is_rate_limit());
        assert!(!StageError::transport("reset").is_rate_limit());
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::NotFound("abc".into());
        assert_eq!(err.to_string(), "Report not found: abc");

        let err = StoreError::InvalidTransition {
            id: "abc".into(),
            from: Stage::Complete,
            reason: "job is read-only".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for job abc at COMPLETE: job is read-only"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PropvalError>();
        assert_send_sync::<StageError>();
    }
}
