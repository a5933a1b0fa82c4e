//! Durable store for workflow state.
//!
//! A workflow persists as a single row carrying its full JSON form, so each
//! save is one atomic upsert. A missing row on `load` is `Ok(None)`,
//! meaning "workflow not found", and is never conflated with a default state.

use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::CoreError;
use crate::models::workflow::WorkflowState;

#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, workflow: &WorkflowState) -> Result<(), CoreError> {
        let id = workflow.id.clone();
        let phase = workflow.current_phase.as_str().to_string();
        let updated_ms = workflow.updated_at.timestamp_millis();
        let state_json = serde_json::to_string(workflow)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize workflow: {}", e)))?;
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, current_phase, state, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                       current_phase = excluded.current_phase,
                       state = excluded.state,
                       updated_at = excluded.updated_at",
                    rusqlite::params![id, phase, state_json, updated_ms],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>, CoreError> {
        let id = workflow_id.to_string();
        let row: Option<String> = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT state FROM workflows WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        match row {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(|e| {
                    CoreError::Database(format!("Corrupt workflow record: {}", e))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<WorkflowState>, CoreError> {
        let rows: Vec<String> = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT state FROM workflows ORDER BY updated_at DESC")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| CoreError::Database(format!("Corrupt workflow record: {}", e)))
            })
            .collect()
    }

    pub async fn list_paused(&self) -> Result<Vec<WorkflowState>, CoreError> {
        let rows: Vec<String> = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT state FROM workflows
                     WHERE current_phase IN ('PAUSED', 'AWAITING_APPROVAL')
                     ORDER BY updated_at DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| CoreError::Database(format!("Corrupt workflow record: {}", e)))
            })
            .collect()
    }

    pub async fn delete(&self, workflow_id: &str) -> Result<bool, CoreError> {
        let id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
                Ok(n > 0)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::models::phase::WorkflowPhase;

    fn store() -> WorkflowStore {
        WorkflowStore::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = store();
        let mut wf = WorkflowState::new(HashMap::new(), HashMap::new());
        wf.data.insert("k".to_string(), serde_json::json!(1));
        store.save(&wf).await.unwrap();

        let loaded = store.load(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, wf.id);
        assert_eq!(loaded.current_phase, WorkflowPhase::Idle);
        assert_eq!(loaded.data["k"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = store();
        assert!(store.load("no-such-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = store();
        let mut wf = WorkflowState::new(HashMap::new(), HashMap::new());
        store.save(&wf).await.unwrap();

        wf.enter_phase(WorkflowPhase::Requirements, "test");
        store.save(&wf).await.unwrap();

        let loaded = store.load(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, WorkflowPhase::Requirements);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_paused_filters_by_phase() {
        let store = store();
        let mut paused = WorkflowState::new(HashMap::new(), HashMap::new());
        paused.enter_phase(WorkflowPhase::Paused, "pause");
        let mut awaiting = WorkflowState::new(HashMap::new(), HashMap::new());
        awaiting.enter_phase(WorkflowPhase::AwaitingApproval, "await_approval");
        let running = WorkflowState::new(HashMap::new(), HashMap::new());

        store.save(&paused).await.unwrap();
        store.save(&awaiting).await.unwrap();
        store.save(&running).await.unwrap();

        let listed = store.list_paused().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|w| w.is_paused()));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let wf = WorkflowState::new(HashMap::new(), HashMap::new());
        store.save(&wf).await.unwrap();
        assert!(store.delete(&wf.id).await.unwrap());
        assert!(!store.delete(&wf.id).await.unwrap());
        assert!(store.load(&wf.id).await.unwrap().is_none());
    }
}
