mod job;
mod retry;
mod stage;

pub use job::{Job, JobError, JobUpdate};
pub use retry::{RetryConfig, StageAttempts, StageMachine, Transition};
pub use stage::{Agent, Stage};
