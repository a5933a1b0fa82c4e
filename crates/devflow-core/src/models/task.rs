//! Scheduled task records and their readiness classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task's readiness, derived from its dependencies' completion/failure
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyStatus {
    /// Some dependency has not completed yet.
    Pending,
    /// Every dependency completed (or there are none); the task may run.
    Satisfied,
    /// At least one dependency failed; the task cannot run as planned.
    Blocked,
    /// The task itself was marked failed.
    Failed,
}

impl DependencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Satisfied => "SATISFIED",
            Self::Blocked => "BLOCKED",
            Self::Failed => "FAILED",
        }
    }
}

/// A task registered with the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    /// Operation name the external executor dispatches on.
    pub operation: String,
    /// Opaque parameters passed through to the executor.
    pub parameters: serde_json::Value,
    /// Ids of tasks that must complete before this one is ready.
    pub dependencies: Vec<String>,
    /// Higher runs first among ready tasks.
    pub priority: i32,
    pub estimated_duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    /// Advisory execution-group id, set by `create_parallel_group`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_group: Option<String>,
    pub status: DependencyStatus,
    pub scheduled_at: DateTime<Utc>,
    /// Insertion order, used as the deterministic tie-break.
    #[serde(default)]
    pub(crate) seq: u64,
}

/// Input for registering a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub operation: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub estimated_duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
}

impl TaskSpec {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            parameters: serde_json::Value::Null,
            dependencies: Vec::new(),
            priority: 0,
            estimated_duration_secs: 0,
            assigned_agent: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_estimated_duration(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = secs;
        self
    }

    pub fn with_assigned_agent(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }
}

/// An advisory grouping of tasks intended to run with bounded concurrency.
///
/// The scheduler does not enforce the cap; it only records the caller's
/// intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGroup {
    pub id: String,
    pub task_ids: Vec<String>,
    pub max_concurrent: usize,
}
