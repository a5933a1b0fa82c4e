//! Workflow State Machine: phase transitions, pause/resume, persistence.
//!
//! Pure state plus transition rules; no knowledge of scheduling or retries.
//! The rule set forms a directed graph over `WorkflowPhase` (cycles allowed,
//! e.g. Testing → Implementation for rework). An invalid transition is a
//! reported `false`, never an error, so the orchestrator can probe
//! alternative next phases without special-casing.
//!
//! `pause`, `resume`, `await_approval`, `fail_workflow` and `cancel_workflow`
//! are administrative overrides: they bypass rule validation through one
//! private forced path and must be the only callers of it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::models::phase::{TransitionTrigger, WorkflowPhase};
use crate::models::workflow::WorkflowState;
use crate::store::WorkflowStore;

/// Guard predicate evaluated against the workflow's `data` bag.
pub type Guard = Arc<dyn Fn(&HashMap<String, serde_json::Value>) -> bool + Send + Sync>;

/// Side-effect callback fired when a rule's transition is applied.
pub type Effect = Arc<dyn Fn(&mut WorkflowState) + Send + Sync>;

/// Observer notified whenever any workflow enters a phase.
pub type PhaseObserver = Arc<dyn Fn(&WorkflowState, WorkflowPhase) + Send + Sync>;

/// One edge in the transition graph.
///
/// At most one rule exists per (from, to) pair; re-registering replaces the
/// prior rule in place, keeping its registration position.
#[derive(Clone)]
pub struct TransitionRule {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    pub trigger: TransitionTrigger,
    pub guard: Option<Guard>,
    pub effect: Option<Effect>,
}

impl TransitionRule {
    pub fn new(from: WorkflowPhase, to: WorkflowPhase, trigger: TransitionTrigger) -> Self {
        Self {
            from,
            to,
            trigger,
            guard: None,
            effect: None,
        }
    }

    pub fn with_guard(
        mut self,
        guard: impl Fn(&HashMap<String, serde_json::Value>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn with_effect(
        mut self,
        effect: impl Fn(&mut WorkflowState) + Send + Sync + 'static,
    ) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }
}

impl std::fmt::Debug for TransitionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionRule")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("trigger", &self.trigger)
            .field("guard", &self.guard.is_some())
            .field("effect", &self.effect.is_some())
            .finish()
    }
}

struct MachineInner {
    workflows: HashMap<String, WorkflowState>,
    rules: Vec<TransitionRule>,
    observers: Vec<PhaseObserver>,
}

/// The workflow state machine.
pub struct WorkflowStateMachine {
    inner: Arc<RwLock<MachineInner>>,
    store: Option<WorkflowStore>,
}

impl WorkflowStateMachine {
    /// Create a machine with an empty rule set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MachineInner {
                workflows: HashMap::new(),
                rules: Vec::new(),
                observers: Vec::new(),
            })),
            store: None,
        }
    }

    /// Create a machine pre-loaded with the standard pipeline graph:
    /// Idle → Requirements → Design → Implementation → Testing → CodeReview →
    /// SecurityAudit → Documentation → Deployment → Monitoring → Completed,
    /// with guarded rework loops from Testing and CodeReview back to
    /// Implementation (taken when `data["needs_rework"]` is true).
    pub fn with_default_rules() -> Self {
        use TransitionTrigger::*;
        use WorkflowPhase::*;

        let rework: Guard = Arc::new(|data: &HashMap<String, serde_json::Value>| {
            data.get("needs_rework").and_then(|v| v.as_bool()) == Some(true)
        });
        let no_rework: Guard = {
            let rework = rework.clone();
            Arc::new(move |data: &HashMap<String, serde_json::Value>| !rework(data))
        };

        let mut rules = vec![
            TransitionRule::new(Idle, Requirements, Automatic),
            TransitionRule::new(Requirements, Design, Automatic),
            TransitionRule::new(Design, Implementation, Automatic),
            TransitionRule::new(Implementation, Testing, Automatic),
        ];
        rules.push(TransitionRule {
            from: Testing,
            to: CodeReview,
            trigger: Automatic,
            guard: Some(no_rework.clone()),
            effect: None,
        });
        rules.push(TransitionRule {
            from: Testing,
            to: Implementation,
            trigger: Conditional,
            guard: Some(rework.clone()),
            effect: None,
        });
        rules.push(TransitionRule {
            from: CodeReview,
            to: SecurityAudit,
            trigger: Automatic,
            guard: Some(no_rework),
            effect: None,
        });
        rules.push(TransitionRule {
            from: CodeReview,
            to: Implementation,
            trigger: Conditional,
            guard: Some(rework),
            effect: None,
        });
        rules.extend([
            TransitionRule::new(SecurityAudit, Documentation, Automatic),
            TransitionRule::new(Documentation, Deployment, Automatic),
            TransitionRule::new(Deployment, Monitoring, Automatic),
            TransitionRule::new(Monitoring, Completed, Automatic),
        ]);

        Self {
            inner: Arc::new(RwLock::new(MachineInner {
                workflows: HashMap::new(),
                rules,
                observers: Vec::new(),
            })),
            store: None,
        }
    }

    /// Attach a durable store. Every subsequent mutation persists the
    /// post-mutation state before the call returns.
    pub fn with_store(mut self, store: WorkflowStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Load all persisted workflows into memory (startup recovery).
    pub async fn restore(&self) -> Result<usize, CoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let workflows = store.list().await?;
        let count = workflows.len();
        let mut inner = self.inner.write().await;
        for wf in workflows {
            inner.workflows.insert(wf.id.clone(), wf);
        }
        tracing::info!("[StateMachine] Restored {} workflow(s) from store", count);
        Ok(count)
    }

    /// Register (or replace) the rule for its (from, to) pair.
    pub async fn add_rule(&self, rule: TransitionRule) {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .rules
            .iter_mut()
            .find(|r| r.from == rule.from && r.to == rule.to)
        {
            *existing = rule;
        } else {
            inner.rules.push(rule);
        }
    }

    /// Register a phase-entry observer.
    pub async fn on_phase_enter(&self, observer: PhaseObserver) {
        self.inner.write().await.observers.push(observer);
    }

    /// Allocate a new workflow in `Idle`. No validation.
    pub async fn create(
        &self,
        initial_data: HashMap<String, serde_json::Value>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowState, CoreError> {
        let workflow = WorkflowState::new(initial_data, metadata);
        let snapshot = workflow.clone();
        {
            let mut inner = self.inner.write().await;
            inner.workflows.insert(workflow.id.clone(), workflow);
            self.persist(&snapshot).await?;
        }
        tracing::info!("[StateMachine] Created workflow {}", snapshot.id);
        Ok(snapshot)
    }

    /// Fetch a snapshot of a workflow, if it exists.
    pub async fn get(&self, workflow_id: &str) -> Option<WorkflowState> {
        self.inner.read().await.workflows.get(workflow_id).cloned()
    }

    /// True iff the workflow exists, is non-terminal, a rule covers
    /// (current_phase, to), and the rule's guard (if any) passes.
    pub async fn can_transition(&self, workflow_id: &str, to: WorkflowPhase) -> bool {
        let inner = self.inner.read().await;
        let Some(wf) = inner.workflows.get(workflow_id) else {
            return false;
        };
        rule_allows(&inner.rules, wf, to)
    }

    /// Apply a validated transition. Returns `Ok(false)` with no partial
    /// mutation when the transition is invalid.
    pub async fn transition(
        &self,
        workflow_id: &str,
        to: WorkflowPhase,
        trigger: &str,
        data: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<bool, CoreError> {
        let (snapshot, observers) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            let Some(wf) = inner.workflows.get_mut(workflow_id) else {
                return Ok(false);
            };
            if !rule_allows(&inner.rules, wf, to) {
                tracing::debug!(
                    "[StateMachine] Rejected transition {} → {} for workflow {}",
                    wf.current_phase,
                    to,
                    workflow_id
                );
                return Ok(false);
            }
            let effect = inner
                .rules
                .iter()
                .find(|r| r.from == wf.current_phase && r.to == to)
                .and_then(|r| r.effect.clone());

            if let Some(updates) = data {
                wf.data.extend(updates);
            }
            wf.enter_phase(to, trigger);
            if let Some(effect) = effect {
                effect(wf);
            }
            let snapshot = wf.clone();
            self.persist(&snapshot).await?;
            (snapshot, inner.observers.clone())
        };

        tracing::debug!(
            from = %snapshot.previous_phase.map(|p| p.as_str()).unwrap_or("-"),
            to = %to,
            workflow_id = %workflow_id,
            "[StateMachine] Transition applied"
        );
        notify(&observers, &snapshot, to);
        Ok(true)
    }

    /// Administrative pause. Bypasses rule validation; records the current
    /// phase so `resume` can return to it.
    pub async fn pause(&self, workflow_id: &str, reason: &str) -> Result<bool, CoreError> {
        self.force(workflow_id, WorkflowPhase::Paused, "pause", move |wf| {
            wf.data.insert(
                "phase_before_pause".to_string(),
                serde_json::json!(wf.current_phase.as_str()),
            );
            wf.data
                .insert("pause_reason".to_string(), serde_json::json!(reason));
        })
        .await
    }

    /// Force-transition to `AwaitingApproval`, recording the checkpoint name.
    pub async fn await_approval(
        &self,
        workflow_id: &str,
        checkpoint: &str,
    ) -> Result<bool, CoreError> {
        self.force(
            workflow_id,
            WorkflowPhase::AwaitingApproval,
            "await_approval",
            move |wf| {
                wf.data.insert(
                    "phase_before_pause".to_string(),
                    serde_json::json!(wf.current_phase.as_str()),
                );
                wf.data
                    .insert("checkpoint".to_string(), serde_json::json!(checkpoint));
            },
        )
        .await
    }

    /// Resume a paused workflow back to the phase recorded at pause time,
    /// merging `approval_data` into its context. Only valid when paused.
    pub async fn resume(
        &self,
        workflow_id: &str,
        approval_data: HashMap<String, serde_json::Value>,
    ) -> Result<bool, CoreError> {
        let (snapshot, observers, target) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            let Some(wf) = inner.workflows.get_mut(workflow_id) else {
                return Ok(false);
            };
            if !wf.is_paused() {
                return Ok(false);
            }
            let Some(target) = wf
                .data
                .get("phase_before_pause")
                .and_then(|v| v.as_str())
                .and_then(WorkflowPhase::from_str)
            else {
                tracing::warn!(
                    "[StateMachine] Workflow {} is paused but has no valid phase_before_pause",
                    workflow_id
                );
                return Ok(false);
            };
            wf.data.extend(approval_data);
            wf.enter_phase(target, "resume");
            let snapshot = wf.clone();
            self.persist(&snapshot).await?;
            (snapshot, inner.observers.clone(), target)
        };
        notify(&observers, &snapshot, target);
        Ok(true)
    }

    /// Force-transition to `Failed`, recording the error.
    pub async fn fail_workflow(&self, workflow_id: &str, error: &str) -> Result<bool, CoreError> {
        let error = error.to_string();
        self.force(workflow_id, WorkflowPhase::Failed, "fail", move |wf| {
            wf.error = Some(error.clone());
        })
        .await
    }

    /// Force-transition to `Cancelled`, unconditionally and immediately.
    /// Optional `details` (e.g. a rejection record) are merged into `data`.
    pub async fn cancel_workflow(
        &self,
        workflow_id: &str,
        details: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<bool, CoreError> {
        self.force(workflow_id, WorkflowPhase::Cancelled, "cancel", move |wf| {
            if let Some(details) = details {
                wf.data.extend(details);
            }
        })
        .await
    }

    /// All phases reachable from the workflow's current phase, in rule
    /// registration order.
    pub async fn valid_transitions(&self, workflow_id: &str) -> Vec<WorkflowPhase> {
        let inner = self.inner.read().await;
        let Some(wf) = inner.workflows.get(workflow_id) else {
            return Vec::new();
        };
        if wf.is_terminal() {
            return Vec::new();
        }
        inner
            .rules
            .iter()
            .filter(|r| r.from == wf.current_phase)
            .filter(|r| r.guard.as_ref().map(|g| g(&wf.data)).unwrap_or(true))
            .map(|r| r.to)
            .collect()
    }

    /// All workflows currently blocked on a pause or approval.
    pub async fn list_pending_approvals(&self) -> Vec<WorkflowState> {
        let inner = self.inner.read().await;
        let mut pending: Vec<WorkflowState> = inner
            .workflows
            .values()
            .filter(|wf| wf.is_paused())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// The single forced-transition escape hatch. `prepare` runs against the
    /// workflow *before* the phase change so it can capture the pre-pause
    /// phase. Rejected on terminal workflows; everything else goes through.
    async fn force(
        &self,
        workflow_id: &str,
        to: WorkflowPhase,
        trigger: &str,
        prepare: impl FnOnce(&mut WorkflowState),
    ) -> Result<bool, CoreError> {
        let (snapshot, observers) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            let Some(wf) = inner.workflows.get_mut(workflow_id) else {
                return Ok(false);
            };
            if wf.is_terminal() {
                return Ok(false);
            }
            if to.is_paused() && wf.is_paused() {
                // Pausing an already-paused workflow would clobber
                // phase_before_pause.
                return Ok(false);
            }
            prepare(wf);
            wf.enter_phase(to, trigger);
            let snapshot = wf.clone();
            self.persist(&snapshot).await?;
            (snapshot, inner.observers.clone())
        };
        tracing::info!(
            "[StateMachine] Forced workflow {} to {} ({})",
            workflow_id,
            to,
            trigger
        );
        notify(&observers, &snapshot, to);
        Ok(true)
    }

    async fn persist(&self, workflow: &WorkflowState) -> Result<(), CoreError> {
        if let Some(store) = &self.store {
            store.save(workflow).await?;
        }
        Ok(())
    }
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn rule_allows(rules: &[TransitionRule], wf: &WorkflowState, to: WorkflowPhase) -> bool {
    if wf.is_terminal() {
        return false;
    }
    rules
        .iter()
        .find(|r| r.from == wf.current_phase && r.to == to)
        .map(|r| r.guard.as_ref().map(|g| g(&wf.data)).unwrap_or(true))
        .unwrap_or(false)
}

fn notify(observers: &[PhaseObserver], workflow: &WorkflowState, phase: WorkflowPhase) {
    for observer in observers {
        observer(workflow, phase);
    }
}
