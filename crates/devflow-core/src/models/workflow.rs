//! The per-workflow state record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::phase::WorkflowPhase;

/// One entry in a workflow's append-only phase history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub phase: WorkflowPhase,
    pub entered_at: DateTime<Utc>,
    /// What caused this entry ("orchestrator", "pause", "resume", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

/// State of one in-flight unit of work.
///
/// Mutated only through the state machine's transition/pause/resume/fail
/// operations. `phase_history` never shrinks or reorders, and its last entry
/// always equals `current_phase` after any mutating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: String,
    pub current_phase: WorkflowPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_phase: Option<WorkflowPhase>,
    pub phase_history: Vec<PhaseRecord>,
    /// Caller-defined context. The only thing phase-executor callbacks may
    /// read and write.
    pub data: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase_started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowState {
    /// Allocate a fresh workflow in `Idle`.
    pub fn new(
        data: HashMap<String, serde_json::Value>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            current_phase: WorkflowPhase::Idle,
            previous_phase: None,
            phase_history: vec![PhaseRecord {
                phase: WorkflowPhase::Idle,
                entered_at: now,
                trigger: Some("create".to_string()),
            }],
            data,
            metadata,
            created_at: now,
            updated_at: now,
            phase_started_at: now,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.current_phase.is_paused()
    }

    /// Move to `phase`, appending to history. Internal to the state machine.
    pub(crate) fn enter_phase(&mut self, phase: WorkflowPhase, trigger: &str) {
        let now = Utc::now();
        self.previous_phase = Some(self.current_phase);
        self.current_phase = phase;
        self.phase_history.push(PhaseRecord {
            phase,
            entered_at: now,
            trigger: Some(trigger.to_string()),
        });
        self.phase_started_at = now;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workflow_starts_idle() {
        let wf = WorkflowState::new(HashMap::new(), HashMap::new());
        assert_eq!(wf.current_phase, WorkflowPhase::Idle);
        assert_eq!(wf.previous_phase, None);
        assert_eq!(wf.phase_history.len(), 1);
        assert_eq!(wf.phase_history[0].phase, WorkflowPhase::Idle);
        assert!(!wf.is_terminal());
        assert!(!wf.is_paused());
    }

    #[test]
    fn test_enter_phase_appends_history() {
        let mut wf = WorkflowState::new(HashMap::new(), HashMap::new());
        wf.enter_phase(WorkflowPhase::Requirements, "test");
        wf.enter_phase(WorkflowPhase::Design, "test");

        assert_eq!(wf.current_phase, WorkflowPhase::Design);
        assert_eq!(wf.previous_phase, Some(WorkflowPhase::Requirements));
        assert_eq!(wf.phase_history.len(), 3);
        assert_eq!(
            wf.phase_history.last().unwrap().phase,
            wf.current_phase
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut wf = WorkflowState::new(HashMap::new(), HashMap::new());
        wf.data
            .insert("key".to_string(), serde_json::json!({"nested": true}));
        wf.enter_phase(WorkflowPhase::Requirements, "test");

        let json = serde_json::to_string(&wf).unwrap();
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, wf.id);
        assert_eq!(restored.current_phase, WorkflowPhase::Requirements);
        assert_eq!(restored.phase_history.len(), 2);
        assert_eq!(restored.data["key"], serde_json::json!({"nested": true}));
    }
}
