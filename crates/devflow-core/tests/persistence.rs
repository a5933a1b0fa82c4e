//! Crash-recovery scenarios: workflows survive a process restart and
//! resume from their persisted phase.

use std::collections::HashMap;
use std::sync::Arc;

use devflow_core::models::breakpoint::BreakpointConfig;
use devflow_core::models::phase::WorkflowPhase;
use devflow_core::orchestrator::{ExecutionMode, ExecutionStatus, PhaseExecutor, PhaseOutput};
use devflow_core::{Database, DualModeOrchestrator, WorkflowStateMachine, WorkflowStore};

fn noop_executor() -> PhaseExecutor {
    Arc::new(|_phase, _data| Box::pin(async { Ok(PhaseOutput::new()) }))
}

#[tokio::test]
async fn workflow_survives_restart_mid_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("devflow.db");

    // First "process": advance a workflow partway, then drop everything.
    let workflow_id = {
        let db = Database::open(db_path.to_str().unwrap()).unwrap();
        let machine = WorkflowStateMachine::with_default_rules().with_store(WorkflowStore::new(db));
        let wf = machine.create(HashMap::new(), HashMap::new()).await.unwrap();
        machine
            .transition(&wf.id, WorkflowPhase::Requirements, "test", None)
            .await
            .unwrap();
        machine
            .transition(&wf.id, WorkflowPhase::Design, "test", None)
            .await
            .unwrap();
        wf.id
    };

    // Second "process": restore and continue from Design.
    let db = Database::open(db_path.to_str().unwrap()).unwrap();
    let machine = WorkflowStateMachine::with_default_rules().with_store(WorkflowStore::new(db));
    let restored = machine.restore().await.unwrap();
    assert_eq!(restored, 1);

    let wf = machine.get(&workflow_id).await.unwrap();
    assert_eq!(wf.current_phase, WorkflowPhase::Design);
    assert_eq!(wf.previous_phase, Some(WorkflowPhase::Requirements));
    assert_eq!(wf.phase_history.len(), 3);

    assert!(machine
        .transition(&workflow_id, WorkflowPhase::Implementation, "test", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn paused_workflow_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("devflow.db");

    let workflow_id = {
        let db = Database::open(db_path.to_str().unwrap()).unwrap();
        let machine = Arc::new(
            WorkflowStateMachine::with_default_rules().with_store(WorkflowStore::new(db)),
        );
        let orchestrator = DualModeOrchestrator::new(
            machine,
            ExecutionMode::Collaborative,
            BreakpointConfig {
                post_design: true,
                ..Default::default()
            },
        );
        orchestrator.set_phase_executor(noop_executor()).await;
        let wf = orchestrator.create_workflow("restartable", None, None).await.unwrap();
        let result = orchestrator.execute(&wf.id, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Paused);
        wf.id
    };

    // The paused workflow is queryable straight from the store.
    let db = Database::open(db_path.to_str().unwrap()).unwrap();
    let store = WorkflowStore::new(db);
    let paused = store.list_paused().await.unwrap();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].id, workflow_id);

    // Restore into a fresh orchestrator and approve through to completion.
    let machine = Arc::new(WorkflowStateMachine::with_default_rules().with_store(store.clone()));
    machine.restore().await.unwrap();
    let orchestrator = DualModeOrchestrator::new(
        machine.clone(),
        ExecutionMode::Collaborative,
        BreakpointConfig {
            post_design: true,
            ..Default::default()
        },
    );
    orchestrator.set_phase_executor(noop_executor()).await;

    assert_eq!(orchestrator.pending_approvals().await.len(), 1);
    let result = orchestrator
        .approve(&workflow_id, "reviewer", None, None)
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);

    let persisted = store.load(&workflow_id).await.unwrap().unwrap();
    assert_eq!(persisted.current_phase, WorkflowPhase::Completed);
    assert_eq!(persisted.data["approvedBy"], serde_json::json!("reviewer"));
}

#[tokio::test]
async fn terminal_workflows_persist_their_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("devflow.db");

    let db = Database::open(db_path.to_str().unwrap()).unwrap();
    let store = WorkflowStore::new(db);
    let machine = WorkflowStateMachine::with_default_rules().with_store(store.clone());

    let failed = machine.create(HashMap::new(), HashMap::new()).await.unwrap();
    machine.fail_workflow(&failed.id, "out of disk").await.unwrap();

    let cancelled = machine.create(HashMap::new(), HashMap::new()).await.unwrap();
    machine.cancel_workflow(&cancelled.id, None).await.unwrap();

    let loaded = store.load(&failed.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_phase, WorkflowPhase::Failed);
    assert_eq!(loaded.error.as_deref(), Some("out of disk"));

    let loaded = store.load(&cancelled.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_phase, WorkflowPhase::Cancelled);

    assert_eq!(store.list().await.unwrap().len(), 2);
    assert!(store.list_paused().await.unwrap().is_empty());
}
