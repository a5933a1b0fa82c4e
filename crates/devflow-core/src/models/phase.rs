//! Workflow phases and transition classifications.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of stages a workflow can be in.
///
/// `Completed`, `Failed` and `Cancelled` are terminal, with no outgoing
/// transitions. `Paused` and `AwaitingApproval` are non-terminal but block
/// forward progress until explicitly resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowPhase {
    Idle,
    Requirements,
    Design,
    Implementation,
    Testing,
    CodeReview,
    SecurityAudit,
    Documentation,
    Deployment,
    Monitoring,
    Paused,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowPhase {
    /// Whether this phase is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether this phase blocks forward progress until explicitly resumed.
    pub fn is_paused(self) -> bool {
        matches!(self, Self::Paused | Self::AwaitingApproval)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Requirements => "REQUIREMENTS",
            Self::Design => "DESIGN",
            Self::Implementation => "IMPLEMENTATION",
            Self::Testing => "TESTING",
            Self::CodeReview => "CODE_REVIEW",
            Self::SecurityAudit => "SECURITY_AUDIT",
            Self::Documentation => "DOCUMENTATION",
            Self::Deployment => "DEPLOYMENT",
            Self::Monitoring => "MONITORING",
            Self::Paused => "PAUSED",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "IDLE" => Some(Self::Idle),
            "REQUIREMENTS" => Some(Self::Requirements),
            "DESIGN" => Some(Self::Design),
            "IMPLEMENTATION" => Some(Self::Implementation),
            "TESTING" => Some(Self::Testing),
            "CODE_REVIEW" => Some(Self::CodeReview),
            "SECURITY_AUDIT" => Some(Self::SecurityAudit),
            "DOCUMENTATION" => Some(Self::Documentation),
            "DEPLOYMENT" => Some(Self::Deployment),
            "MONITORING" => Some(Self::Monitoring),
            "PAUSED" => Some(Self::Paused),
            "AWAITING_APPROVAL" => Some(Self::AwaitingApproval),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a registered transition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionTrigger {
    Automatic,
    Manual,
    Conditional,
    HumanApproval,
    Breakpoint,
    Timeout,
    Error,
}

impl TransitionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::Manual => "MANUAL",
            Self::Conditional => "CONDITIONAL",
            Self::HumanApproval => "HUMAN_APPROVAL",
            Self::Breakpoint => "BREAKPOINT",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }
}
