//! Breakpoint policy for collaborative-mode execution.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::phase::WorkflowPhase;

/// A named pause point, triggered after a specific phase completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Breakpoint {
    PostDesign,
    PostPlan,
    PreTesting,
    PreDeployment,
    OnFailure,
    Custom(WorkflowPhase),
}

impl Breakpoint {
    /// The checkpoint name recorded on the paused workflow.
    pub fn name(&self) -> String {
        match self {
            Self::PostDesign => "post_design".to_string(),
            Self::PostPlan => "post_plan".to_string(),
            Self::PreTesting => "pre_testing".to_string(),
            Self::PreDeployment => "pre_deployment".to_string(),
            Self::OnFailure => "on_failure".to_string(),
            Self::Custom(phase) => format!("custom_{}", phase.as_str().to_lowercase()),
        }
    }
}

/// Which checkpoints a collaborative-mode workflow pauses at.
///
/// `should_pause_at` is keyed by the phase that just finished executing:
/// `pre_testing` fires on Implementation (the phase before Testing) and
/// `pre_deployment` on Documentation (the phase before Deployment).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointConfig {
    #[serde(default)]
    pub post_design: bool,
    #[serde(default)]
    pub post_plan: bool,
    #[serde(default)]
    pub pre_testing: bool,
    #[serde(default)]
    pub pre_deployment: bool,
    #[serde(default)]
    pub on_failure: bool,
    #[serde(default)]
    pub custom_phases: HashSet<WorkflowPhase>,
}

impl BreakpointConfig {
    /// Pause at every supported checkpoint.
    pub fn all() -> Self {
        Self {
            post_design: true,
            post_plan: true,
            pre_testing: true,
            pre_deployment: true,
            on_failure: true,
            custom_phases: HashSet::new(),
        }
    }

    /// Map a just-completed phase to the breakpoint it triggers, if any.
    pub fn should_pause_at(&self, phase: WorkflowPhase) -> Option<Breakpoint> {
        match phase {
            WorkflowPhase::Design if self.post_design => Some(Breakpoint::PostDesign),
            WorkflowPhase::Requirements if self.post_plan => Some(Breakpoint::PostPlan),
            WorkflowPhase::Implementation if self.pre_testing => Some(Breakpoint::PreTesting),
            WorkflowPhase::Documentation if self.pre_deployment => {
                Some(Breakpoint::PreDeployment)
            }
            p if self.custom_phases.contains(&p) => Some(Breakpoint::Custom(p)),
            _ => None,
        }
    }
}
