//! Dual-Mode Orchestrator: drives workflows autonomously or with human
//! approval gates.
//!
//! The orchestrator owns no phase logic of its own: it advances the state
//! machine phase by phase, invoking the host-supplied executor for each one.
//! In `Autonomous` mode it runs until a terminal phase or a stall; in
//! `Collaborative` mode it additionally parks the workflow in
//! `AwaitingApproval` at configured breakpoints and on executor failure.
//!
//! Breakpoints are keyed by the phase that just finished executing, and the
//! pause lands *after* the transition out of it. Resuming therefore
//! continues from the next phase and can never re-trip the same breakpoint.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::generator::BoxFuture;
use crate::machine::WorkflowStateMachine;
use crate::models::breakpoint::{Breakpoint, BreakpointConfig};
use crate::models::phase::WorkflowPhase;
use crate::models::workflow::WorkflowState;

/// How the orchestrator treats breakpoints and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Run to completion without human input.
    Autonomous,
    /// Pause at configured breakpoints and on failure for human review.
    Collaborative,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "AUTONOMOUS",
            Self::Collaborative => "COLLABORATIVE",
        }
    }
}

/// Why an `execute`/`approve` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Paused,
    Cancelled,
    /// Non-terminal phase with no valid outgoing transition.
    Stalled,
}

/// Outcome of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub final_phase: WorkflowPhase,
    /// Checkpoint name when `status` is `Paused` at a breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Data produced by executing one phase, merged into the workflow's context
/// on the transition out of that phase.
pub type PhaseOutput = HashMap<String, serde_json::Value>;

/// Host-supplied phase executor: runs the given phase against the workflow's
/// current data and returns the data it produced, or an error message.
pub type PhaseExecutor =
    Arc<dyn Fn(WorkflowPhase, HashMap<String, serde_json::Value>) -> BoxFuture<Result<PhaseOutput, String>> + Send + Sync>;

/// Called when a collaborative workflow parks at a breakpoint.
pub type NotificationHandler = Arc<dyn Fn(&str, &WorkflowState, &Breakpoint) + Send + Sync>;

pub struct DualModeOrchestrator {
    machine: Arc<WorkflowStateMachine>,
    mode: ExecutionMode,
    breakpoints: BreakpointConfig,
    executor: RwLock<Option<PhaseExecutor>>,
    notification: RwLock<Option<NotificationHandler>>,
}

impl DualModeOrchestrator {
    pub fn new(
        machine: Arc<WorkflowStateMachine>,
        mode: ExecutionMode,
        breakpoints: BreakpointConfig,
    ) -> Self {
        Self {
            machine,
            mode,
            breakpoints,
            executor: RwLock::new(None),
            notification: RwLock::new(None),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn machine(&self) -> &Arc<WorkflowStateMachine> {
        &self.machine
    }

    /// Install the phase executor used by `execute` and `approve`.
    pub async fn set_phase_executor(&self, executor: PhaseExecutor) {
        *self.executor.write().await = Some(executor);
    }

    /// Install the breakpoint notification handler.
    pub async fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification.write().await = Some(handler);
    }

    /// Create a workflow tagged with this orchestrator's mode.
    pub async fn create_workflow(
        &self,
        description: &str,
        project_id: Option<&str>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<WorkflowState, CoreError> {
        let mut data = HashMap::new();
        data.insert(
            "description".to_string(),
            serde_json::json!(description),
        );
        let mut meta = metadata.unwrap_or_default();
        meta.insert("mode".to_string(), serde_json::json!(self.mode.as_str()));
        if let Some(project_id) = project_id {
            meta.insert("projectId".to_string(), serde_json::json!(project_id));
        }
        self.machine.create(data, meta).await
    }

    /// Drive the workflow forward until it completes, fails, stalls, or
    /// pauses for review. `executor_override` replaces the installed
    /// executor for this run only.
    pub async fn execute(
        &self,
        workflow_id: &str,
        executor_override: Option<PhaseExecutor>,
    ) -> Result<ExecutionResult, CoreError> {
        let executor = match executor_override {
            Some(executor) => Some(executor),
            None => self.executor.read().await.clone(),
        };
        self.run_loop(workflow_id, executor).await
    }

    /// Approve a paused workflow and resume driving it. The approval record
    /// and any reviewer modifications are merged into the workflow data.
    pub async fn approve(
        &self,
        workflow_id: &str,
        reviewer_id: &str,
        comments: Option<&str>,
        modifications: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<ExecutionResult, CoreError> {
        let workflow = self
            .machine
            .get(workflow_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("Workflow not found: {}", workflow_id)))?;
        if !workflow.is_paused() {
            return Err(CoreError::BadRequest(format!(
                "Workflow {} is not awaiting approval (phase: {})",
                workflow_id, workflow.current_phase
            )));
        }

        let mut approval = modifications.unwrap_or_default();
        approval.insert("approvedBy".to_string(), serde_json::json!(reviewer_id));
        approval.insert(
            "approvedAt".to_string(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        if let Some(comments) = comments {
            approval.insert("approvalComments".to_string(), serde_json::json!(comments));
        }
        if !self.machine.resume(workflow_id, approval).await? {
            return Err(CoreError::Conflict(format!(
                "Workflow {} could not be resumed",
                workflow_id
            )));
        }
        tracing::info!(
            "[Orchestrator] Workflow {} approved by {}",
            workflow_id,
            reviewer_id
        );

        let executor = self.executor.read().await.clone();
        self.run_loop(workflow_id, executor).await
    }

    /// Reject a paused workflow, cancelling it with a rejection record.
    pub async fn reject(
        &self,
        workflow_id: &str,
        reviewer_id: &str,
        reason: &str,
    ) -> Result<ExecutionResult, CoreError> {
        let workflow = self
            .machine
            .get(workflow_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("Workflow not found: {}", workflow_id)))?;
        if !workflow.is_paused() {
            return Err(CoreError::BadRequest(format!(
                "Workflow {} is not awaiting approval (phase: {})",
                workflow_id, workflow.current_phase
            )));
        }

        let mut details = HashMap::new();
        details.insert("rejectedBy".to_string(), serde_json::json!(reviewer_id));
        details.insert("rejectionReason".to_string(), serde_json::json!(reason));
        details.insert(
            "rejectedAt".to_string(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        self.machine.cancel_workflow(workflow_id, Some(details)).await?;
        tracing::info!(
            "[Orchestrator] Workflow {} rejected by {}: {}",
            workflow_id,
            reviewer_id,
            reason
        );

        Ok(ExecutionResult {
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Cancelled,
            final_phase: WorkflowPhase::Cancelled,
            checkpoint: None,
            error: None,
        })
    }

    /// All workflows parked for review.
    pub async fn pending_approvals(&self) -> Vec<WorkflowState> {
        self.machine.list_pending_approvals().await
    }

    async fn run_loop(
        &self,
        workflow_id: &str,
        executor: Option<PhaseExecutor>,
    ) -> Result<ExecutionResult, CoreError> {
        loop {
            let workflow = self.machine.get(workflow_id).await.ok_or_else(|| {
                CoreError::NotFound(format!("Workflow not found: {}", workflow_id))
            })?;
            if workflow.is_terminal() {
                return Ok(terminal_result(&workflow));
            }
            if workflow.is_paused() {
                return Ok(paused_result(&workflow, None));
            }

            let current = workflow.current_phase;
            let next_phases = self.machine.valid_transitions(workflow_id).await;
            let Some(&next) = next_phases.first() else {
                tracing::warn!(
                    "[Orchestrator] Workflow {} stalled in phase {}",
                    workflow_id,
                    current
                );
                return Ok(ExecutionResult {
                    workflow_id: workflow_id.to_string(),
                    status: ExecutionStatus::Stalled,
                    final_phase: current,
                    checkpoint: None,
                    error: None,
                });
            };

            // Execute the current phase. No locks are held here, so
            // cancellation and pausing can race with the executor.
            let output = match &executor {
                Some(executor) => match executor(current, workflow.data.clone()).await {
                    Ok(output) => Some(output),
                    Err(message) => return self.handle_failure(workflow_id, &message).await,
                },
                None => None,
            };

            // Re-read before applying: the workflow may have been cancelled
            // or paused while the executor ran. Its output is discarded.
            let refreshed = self.machine.get(workflow_id).await.ok_or_else(|| {
                CoreError::NotFound(format!("Workflow not found: {}", workflow_id))
            })?;
            if refreshed.is_terminal() {
                if output.is_some() {
                    tracing::warn!(
                        "[Orchestrator] Discarding output of phase {} for workflow {} ({})",
                        current,
                        workflow_id,
                        refreshed.current_phase
                    );
                }
                return Ok(terminal_result(&refreshed));
            }
            if refreshed.is_paused() {
                return Ok(paused_result(&refreshed, None));
            }

            if !self
                .machine
                .transition(workflow_id, next, "orchestrator", output)
                .await?
            {
                // State changed under us; re-evaluate from the top.
                continue;
            }

            if self.mode == ExecutionMode::Collaborative {
                if let Some(breakpoint) = self.breakpoints.should_pause_at(current) {
                    return self.park_at_breakpoint(workflow_id, breakpoint).await;
                }
            }
        }
    }

    /// Executor failure: in collaborative mode with the on-failure gate
    /// enabled the workflow parks for review (resume retries the phase);
    /// otherwise it fails terminally.
    async fn handle_failure(
        &self,
        workflow_id: &str,
        message: &str,
    ) -> Result<ExecutionResult, CoreError> {
        if self.mode == ExecutionMode::Collaborative && self.breakpoints.on_failure {
            tracing::warn!(
                "[Orchestrator] Workflow {} paused on failure: {}",
                workflow_id,
                message
            );
            let mut result = self
                .park_at_breakpoint(workflow_id, Breakpoint::OnFailure)
                .await?;
            result.error = Some(message.to_string());
            return Ok(result);
        }

        self.machine.fail_workflow(workflow_id, message).await?;
        tracing::error!(
            "[Orchestrator] Workflow {} failed: {}",
            workflow_id,
            message
        );
        Ok(ExecutionResult {
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Failed,
            final_phase: WorkflowPhase::Failed,
            checkpoint: None,
            error: Some(message.to_string()),
        })
    }

    async fn park_at_breakpoint(
        &self,
        workflow_id: &str,
        breakpoint: Breakpoint,
    ) -> Result<ExecutionResult, CoreError> {
        let checkpoint = breakpoint.name();
        if !self.machine.await_approval(workflow_id, &checkpoint).await? {
            // Raced with a cancel or another pause; report what stands.
            let workflow = self.machine.get(workflow_id).await.ok_or_else(|| {
                CoreError::NotFound(format!("Workflow not found: {}", workflow_id))
            })?;
            if workflow.is_terminal() {
                return Ok(terminal_result(&workflow));
            }
            return Ok(paused_result(&workflow, None));
        }

        let workflow = self.machine.get(workflow_id).await.ok_or_else(|| {
            CoreError::NotFound(format!("Workflow not found: {}", workflow_id))
        })?;
        tracing::info!(
            "[Orchestrator] Workflow {} awaiting approval at {}",
            workflow_id,
            checkpoint
        );
        if let Some(handler) = self.notification.read().await.clone() {
            handler(workflow_id, &workflow, &breakpoint);
        }
        Ok(paused_result(&workflow, Some(checkpoint)))
    }
}

fn terminal_result(workflow: &WorkflowState) -> ExecutionResult {
    let status = match workflow.current_phase {
        WorkflowPhase::Completed => ExecutionStatus::Completed,
        WorkflowPhase::Cancelled => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Failed,
    };
    ExecutionResult {
        workflow_id: workflow.id.clone(),
        status,
        final_phase: workflow.current_phase,
        checkpoint: None,
        error: workflow.error.clone(),
    }
}

fn paused_result(workflow: &WorkflowState, checkpoint: Option<String>) -> ExecutionResult {
    let checkpoint = checkpoint.or_else(|| {
        workflow
            .data
            .get("checkpoint")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    });
    ExecutionResult {
        workflow_id: workflow.id.clone(),
        status: ExecutionStatus::Paused,
        final_phase: workflow.current_phase,
        checkpoint,
        error: None,
    }
}
