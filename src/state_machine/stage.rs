use std::fmt;

use serde::{Deserialize, Serialize};

/// The stages of the report pipeline.
///
/// Each job flows through: QUEUED → RESEARCHING → EVALUATING → REVIEWING →
/// GENERATING → COMPLETE, and may drop to FAILED from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Queued,
    Researching,
    Evaluating,
    Reviewing,
    Generating,
    Complete,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Queued => write!(f, "QUEUED"),
            Stage::Researching => write!(f, "RESEARCHING"),
            Stage::Evaluating => write!(f, "EVALUATING"),
            Stage::Reviewing => write!(f, "REVIEWING"),
            Stage::Generating => write!(f, "GENERATING"),
            Stage::Complete => write!(f, "COMPLETE"),
            Stage::Failed => write!(f, "FAILED"),
        }
    }
}

impl Stage {
    /// The four stages that invoke a collaborator, in execution order.
    pub const PIPELINE: [Stage; 4] = [
        Stage::Researching,
        Stage::Evaluating,
        Stage::Reviewing,
        Stage::Generating,
    ];

    /// The forward successor, or `None` for terminal stages.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Researching),
            Stage::Researching => Some(Stage::Evaluating),
            Stage::Evaluating => Some(Stage::Reviewing),
            Stage::Reviewing => Some(Stage::Generating),
            Stage::Generating => Some(Stage::Complete),
            Stage::Complete | Stage::Failed => None,
        }
    }

    /// The stage that must have completed before this one starts.
    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Researching => Some(Stage::Queued),
            Stage::Evaluating => Some(Stage::Researching),
            Stage::Reviewing => Some(Stage::Evaluating),
            Stage::Generating => Some(Stage::Reviewing),
            Stage::Complete => Some(Stage::Generating),
            Stage::Queued | Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    pub fn is_pipeline(self) -> bool {
        self.agent().is_some()
    }

    /// Only the forward successor and FAILED (from a non-terminal stage) are legal.
    pub fn can_transition_to(self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Stage::Failed || self.next() == Some(to)
    }

    /// Progress percentage reached once this stage has completed.
    pub fn checkpoint(self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::Researching => 25,
            Stage::Evaluating => 50,
            Stage::Reviewing => 75,
            Stage::Generating | Stage::Complete => 100,
            Stage::Failed => 0,
        }
    }

    pub fn agent(self) -> Option<Agent> {
        match self {
            Stage::Researching => Some(Agent::Research),
            Stage::Evaluating => Some(Agent::Evaluation),
            Stage::Reviewing => Some(Agent::Accessor),
            Stage::Generating => Some(Agent::Report),
            _ => None,
        }
    }

    /// Lower-case label used by the status payload.
    pub fn status_label(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Researching => "researching",
            Stage::Evaluating => "evaluating",
            Stage::Reviewing => "reviewing",
            Stage::Generating => "generating",
            Stage::Complete => "complete",
            Stage::Failed => "error",
        }
    }

    pub fn activity(self) -> &'static str {
        match self {
            Stage::Queued => "Starting research...",
            Stage::Researching => "Researching property data...",
            Stage::Evaluating => "Evaluating property data...",
            Stage::Reviewing => "Reviewing and approving data...",
            Stage::Generating => "Generating report...",
            Stage::Complete => "Report generation complete",
            Stage::Failed => "Report generation failed",
        }
    }
}

/// The collaborator role attached to each pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Research,
    Evaluation,
    Accessor,
    Report,
}

impl Agent {
    #[cfg(test)]
    pub fn stage(self) -> Stage {
        match self {
            Agent::Research => Stage::Researching,
            Agent::Evaluation => Stage::Evaluating,
            Agent::Accessor => Stage::Reviewing,
            Agent::Report => Stage::Generating,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Agent::Research => "research",
            Agent::Evaluation => "evaluation",
            Agent::Accessor => "accessor",
            Agent::Report => "report",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Agent::Research => "Research",
            Agent::Evaluation => "Evaluation",
            Agent::Accessor => "Review",
            Agent::Report => "Report",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
