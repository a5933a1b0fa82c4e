//! Task Scheduler: dependency tracking, readiness, and execution ordering.
//!
//! Dependency status is derived, never stored as truth: `ready_tasks`
//! recomputes it from the completed/failed sets on every call, so readiness
//! can never go stale. Failure blocking is one hop only: a failed task
//! blocks its direct dependents, and transitive descendants simply never
//! become ready because their blocked parents never complete.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::task::{DependencyStatus, ParallelGroup, ScheduledTask, TaskSpec};

/// Dependency-respecting execution plan.
///
/// `layers[0]` holds tasks with no unfinished dependencies; each later layer
/// depends only on earlier ones. Tasks caught in a dependency cycle land in
/// `unschedulable` instead of silently vanishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOrder {
    pub layers: Vec<Vec<String>>,
    pub unschedulable: Vec<String>,
}

struct SchedulerInner {
    tasks: HashMap<String, ScheduledTask>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    /// Reverse dependency index: task id → ids of tasks that depend on it.
    dependents: HashMap<String, Vec<String>>,
    groups: HashMap<String, ParallelGroup>,
    next_seq: u64,
}

impl SchedulerInner {
    /// Derive a task's dependency status from the current completed/failed
    /// sets. A dependency on an unknown task id counts as unfinished.
    fn compute_status(&self, task: &ScheduledTask) -> DependencyStatus {
        if task.dependencies.is_empty() {
            return DependencyStatus::Satisfied;
        }
        if task.dependencies.iter().any(|d| self.failed.contains(d)) {
            return DependencyStatus::Blocked;
        }
        if task.dependencies.iter().all(|d| self.completed.contains(d)) {
            DependencyStatus::Satisfied
        } else {
            DependencyStatus::Pending
        }
    }

    fn insert(&mut self, spec: TaskSpec) -> String {
        let id = Uuid::new_v4().to_string();
        for dep in &spec.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .push(id.clone());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut task = ScheduledTask {
            id: id.clone(),
            operation: spec.operation,
            parameters: spec.parameters,
            dependencies: spec.dependencies,
            priority: spec.priority,
            estimated_duration_secs: spec.estimated_duration_secs,
            assigned_agent: spec.assigned_agent,
            execution_group: None,
            status: DependencyStatus::Pending,
            scheduled_at: Utc::now(),
            seq,
        };
        task.status = self.compute_status(&task);
        tracing::debug!(
            "[Scheduler] Scheduled task {} ({}) with {} dependency(ies)",
            task.id,
            task.operation,
            task.dependencies.len()
        );
        self.tasks.insert(id.clone(), task);
        id
    }

    /// Refresh the stored status of a finished task's direct dependents.
    fn refresh_dependents(&mut self, task_id: &str) {
        let Some(dependent_ids) = self.dependents.get(task_id).cloned() else {
            return;
        };
        for dep_id in dependent_ids {
            if let Some(task) = self.tasks.get(&dep_id) {
                let status = self.compute_status(task);
                if let Some(task) = self.tasks.get_mut(&dep_id) {
                    task.status = status;
                }
            }
        }
    }
}

/// In-memory task scheduler shared across the orchestrator and executors.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<RwLock<SchedulerInner>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SchedulerInner {
                tasks: HashMap::new(),
                completed: HashSet::new(),
                failed: HashSet::new(),
                dependents: HashMap::new(),
                groups: HashMap::new(),
                next_seq: 0,
            })),
        }
    }

    /// Register a task and return its generated id.
    pub async fn schedule(&self, spec: TaskSpec) -> String {
        self.inner.write().await.insert(spec)
    }

    /// Register several tasks under one lock acquisition, preserving order.
    pub async fn schedule_batch(&self, specs: Vec<TaskSpec>) -> Vec<String> {
        let mut inner = self.inner.write().await;
        specs.into_iter().map(|spec| inner.insert(spec)).collect()
    }

    pub async fn get(&self, task_id: &str) -> Option<ScheduledTask> {
        self.inner.read().await.tasks.get(task_id).cloned()
    }

    /// Remove a task entirely. Its entry in the completed/failed sets (if
    /// any) is kept so dependents still resolve.
    pub async fn remove(&self, task_id: &str) -> bool {
        self.inner.write().await.tasks.remove(task_id).is_some()
    }

    /// All tasks currently runnable: not finished, and every dependency
    /// completed. Sorted by priority (descending), then schedule time, then
    /// insertion order as the final tiebreak.
    pub async fn ready_tasks(&self) -> Vec<ScheduledTask> {
        let inner = self.inner.read().await;
        let mut ready: Vec<ScheduledTask> = inner
            .tasks
            .values()
            .filter(|t| !inner.completed.contains(&t.id) && !inner.failed.contains(&t.id))
            .filter(|t| inner.compute_status(t) == DependencyStatus::Satisfied)
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.seq.cmp(&b.seq))
        });
        ready
    }

    /// The first `max` ready tasks, same ordering as `ready_tasks`.
    pub async fn next_batch(&self, max: usize) -> Vec<ScheduledTask> {
        let mut ready = self.ready_tasks().await;
        ready.truncate(max);
        ready
    }

    /// Mark a task completed. Returns false for unknown ids.
    pub async fn mark_completed(&self, task_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(task_id) {
            return false;
        }
        inner.completed.insert(task_id.to_string());
        inner.failed.remove(task_id);
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = DependencyStatus::Satisfied;
        }
        inner.refresh_dependents(task_id);
        tracing::debug!("[Scheduler] Task {} completed", task_id);
        true
    }

    /// Mark a task failed, blocking its direct dependents.
    pub async fn mark_failed(&self, task_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(task_id) {
            return false;
        }
        inner.failed.insert(task_id.to_string());
        inner.completed.remove(task_id);
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = DependencyStatus::Failed;
        }
        inner.refresh_dependents(task_id);
        tracing::warn!("[Scheduler] Task {} failed, direct dependents blocked", task_id);
        true
    }

    /// Add a dependency edge to an already-scheduled task. Returns false if
    /// the task is unknown; the dependency id itself may be settled later.
    pub async fn add_dependency(&self, task_id: &str, depends_on: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(task_id) {
            return false;
        }
        inner
            .dependents
            .entry(depends_on.to_string())
            .or_default()
            .push(task_id.to_string());
        if let Some(task) = inner.tasks.get_mut(task_id) {
            if !task.dependencies.iter().any(|d| d == depends_on) {
                task.dependencies.push(depends_on.to_string());
            }
        }
        if let Some(task) = inner.tasks.get(task_id) {
            let status = inner.compute_status(task);
            if let Some(task) = inner.tasks.get_mut(task_id) {
                task.status = status;
            }
        }
        true
    }

    /// Group tasks for concurrent execution with a concurrency cap. The
    /// grouping is advisory: it tags tasks and records the group, and the
    /// caller enforces `max_concurrent`.
    pub async fn create_parallel_group(
        &self,
        task_ids: Vec<String>,
        max_concurrent: usize,
    ) -> Result<String, CoreError> {
        let mut inner = self.inner.write().await;
        for id in &task_ids {
            if !inner.tasks.contains_key(id) {
                return Err(CoreError::BadRequest(format!(
                    "Cannot group unknown task: {}",
                    id
                )));
            }
        }
        let group_id = Uuid::new_v4().to_string();
        for id in &task_ids {
            if let Some(task) = inner.tasks.get_mut(id) {
                task.execution_group = Some(group_id.clone());
            }
        }
        inner.groups.insert(
            group_id.clone(),
            ParallelGroup {
                id: group_id.clone(),
                task_ids,
                max_concurrent,
            },
        );
        Ok(group_id)
    }

    pub async fn get_parallel_group(&self, group_id: &str) -> Option<ParallelGroup> {
        self.inner.read().await.groups.get(group_id).cloned()
    }

    /// Compute a layered execution plan over all unfinished tasks (Kahn's
    /// algorithm). Dependencies on completed, failed, or unknown-but-settled
    /// tasks contribute no edge; tasks left with unresolved in-degree when
    /// the frontier empties are part of a cycle and reported unschedulable.
    pub async fn resolve_execution_order(&self) -> ExecutionOrder {
        let inner = self.inner.read().await;
        let pending: HashMap<&str, &ScheduledTask> = inner
            .tasks
            .values()
            .filter(|t| !inner.completed.contains(&t.id) && !inner.failed.contains(&t.id))
            .map(|t| (t.id.as_str(), t))
            .collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in pending.values() {
            let unresolved = task
                .dependencies
                .iter()
                .filter(|d| pending.contains_key(d.as_str()))
                .count();
            in_degree.insert(task.id.as_str(), unresolved);
            for dep in &task.dependencies {
                if pending.contains_key(dep.as_str()) {
                    edges.entry(dep.as_str()).or_default().push(task.id.as_str());
                }
            }
        }

        let mut frontier: Vec<&ScheduledTask> = pending
            .values()
            .filter(|t| in_degree[t.id.as_str()] == 0)
            .copied()
            .collect();
        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut placed: HashSet<&str> = HashSet::new();

        while !frontier.is_empty() {
            frontier.sort_by_key(|t| t.seq);
            let layer: Vec<String> = frontier.iter().map(|t| t.id.clone()).collect();
            let mut next: VecDeque<&str> = VecDeque::new();
            for task in &frontier {
                placed.insert(task.id.as_str());
                if let Some(dependents) = edges.get(task.id.as_str()) {
                    for dep_id in dependents {
                        let degree = in_degree.get_mut(dep_id).unwrap();
                        *degree -= 1;
                        if *degree == 0 {
                            next.push_back(dep_id);
                        }
                    }
                }
            }
            layers.push(layer);
            frontier = next.into_iter().map(|id| pending[id]).collect();
        }

        let mut unschedulable: Vec<String> = pending
            .values()
            .filter(|t| !placed.contains(t.id.as_str()))
            .map(|t| t.id.clone())
            .collect();
        unschedulable.sort_by_key(|id| pending[id.as_str()].seq);
        if !unschedulable.is_empty() {
            tracing::warn!(
                "[Scheduler] {} task(s) unschedulable due to a dependency cycle",
                unschedulable.len()
            );
        }

        ExecutionOrder {
            layers,
            unschedulable,
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_tasks_follow_dependencies() {
        let scheduler = TaskScheduler::new();
        let t1 = scheduler.schedule(TaskSpec::new("build")).await;
        let t2 = scheduler
            .schedule(TaskSpec::new("test").with_dependencies(vec![t1.clone()]))
            .await;
        let t3 = scheduler
            .schedule(TaskSpec::new("deploy").with_dependencies(vec![t2.clone()]))
            .await;

        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![t1.clone()]);

        scheduler.mark_completed(&t1).await;
        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![t2.clone()]);

        scheduler.mark_completed(&t2).await;
        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![t3]);
    }

    #[tokio::test]
    async fn test_fan_out_becomes_ready_together() {
        let scheduler = TaskScheduler::new();
        let t1 = scheduler.schedule(TaskSpec::new("t1")).await;
        let t2 = scheduler
            .schedule(
                TaskSpec::new("t2")
                    .with_dependencies(vec![t1.clone()])
                    .with_priority(5),
            )
            .await;
        let t3 = scheduler
            .schedule(
                TaskSpec::new("t3")
                    .with_dependencies(vec![t1.clone()])
                    .with_priority(1),
            )
            .await;

        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![t1.clone()]);

        scheduler.mark_completed(&t1).await;
        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![t2, t3]);
    }

    #[tokio::test]
    async fn test_multi_dependency_requires_all_completed() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        let b = scheduler.schedule(TaskSpec::new("b")).await;
        let c = scheduler
            .schedule(TaskSpec::new("c").with_dependencies(vec![a.clone(), b.clone()]))
            .await;

        scheduler.mark_completed(&a).await;
        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert!(!ready.contains(&c));

        scheduler.mark_completed(&b).await;
        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![c]);
    }

    #[tokio::test]
    async fn test_one_failed_dependency_blocks_despite_other_completing() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        let b = scheduler.schedule(TaskSpec::new("b")).await;
        let c = scheduler
            .schedule(TaskSpec::new("c").with_dependencies(vec![a.clone(), b.clone()]))
            .await;

        scheduler.mark_completed(&b).await;
        scheduler.mark_failed(&a).await;
        assert_eq!(
            scheduler.get(&c).await.unwrap().status,
            DependencyStatus::Blocked
        );
        assert!(scheduler.ready_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_one_hop() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        let b = scheduler
            .schedule(TaskSpec::new("b").with_dependencies(vec![a.clone()]))
            .await;
        let c = scheduler
            .schedule(TaskSpec::new("c").with_dependencies(vec![b.clone()]))
            .await;

        scheduler.mark_failed(&a).await;

        let b_task = scheduler.get(&b).await.unwrap();
        assert_eq!(b_task.status, DependencyStatus::Blocked);
        // c's parent failed nothing directly, so c stays Pending, not Blocked.
        let c_task = scheduler.get(&c).await.unwrap();
        assert_eq!(c_task.status, DependencyStatus::Pending);

        // Neither ever becomes ready.
        assert!(scheduler.ready_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_ready_ordering_priority_then_schedule_order() {
        let scheduler = TaskScheduler::new();
        let low = scheduler.schedule(TaskSpec::new("low").with_priority(1)).await;
        let high = scheduler.schedule(TaskSpec::new("high").with_priority(10)).await;
        let mid_first = scheduler.schedule(TaskSpec::new("mid1").with_priority(5)).await;
        let mid_second = scheduler.schedule(TaskSpec::new("mid2").with_priority(5)).await;

        let ready: Vec<String> = scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![high, mid_first, mid_second, low]);

        let batch = scheduler.next_batch(2).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].operation, "high");
    }

    #[tokio::test]
    async fn test_execution_order_layers() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        let b = scheduler.schedule(TaskSpec::new("b")).await;
        let c = scheduler
            .schedule(TaskSpec::new("c").with_dependencies(vec![a.clone(), b.clone()]))
            .await;
        let d = scheduler
            .schedule(TaskSpec::new("d").with_dependencies(vec![c.clone()]))
            .await;

        let order = scheduler.resolve_execution_order().await;
        assert!(order.unschedulable.is_empty());
        assert_eq!(order.layers.len(), 3);
        assert_eq!(order.layers[0], vec![a, b]);
        assert_eq!(order.layers[1], vec![c]);
        assert_eq!(order.layers[2], vec![d]);
    }

    #[tokio::test]
    async fn test_execution_order_skips_settled_dependencies() {
        let scheduler = TaskScheduler::new();
        let done = scheduler.schedule(TaskSpec::new("done")).await;
        let next = scheduler
            .schedule(TaskSpec::new("next").with_dependencies(vec![done.clone()]))
            .await;
        scheduler.mark_completed(&done).await;

        let order = scheduler.resolve_execution_order().await;
        assert_eq!(order.layers, vec![vec![next]]);
    }

    #[tokio::test]
    async fn test_cycle_reported_as_unschedulable() {
        let scheduler = TaskScheduler::new();
        let root = scheduler.schedule(TaskSpec::new("root")).await;
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        let b = scheduler
            .schedule(TaskSpec::new("b").with_dependencies(vec![a.clone()]))
            .await;
        let c = scheduler
            .schedule(TaskSpec::new("c").with_dependencies(vec![b.clone()]))
            .await;
        // Close the loop: a → b → c → a.
        assert!(scheduler.add_dependency(&a, &c).await);

        let order = scheduler.resolve_execution_order().await;
        assert_eq!(order.layers, vec![vec![root]]);
        assert_eq!(order.unschedulable, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_add_dependency_updates_readiness() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        let b = scheduler.schedule(TaskSpec::new("b")).await;
        assert!(scheduler.add_dependency(&b, &a).await);
        assert!(!scheduler.add_dependency("missing", &a).await);

        let ready: Vec<String> =
            scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![a.clone()]);

        scheduler.mark_completed(&a).await;
        let ready: Vec<String> =
            scheduler.ready_tasks().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec![b]);
    }

    #[tokio::test]
    async fn test_parallel_group_requires_known_tasks() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;

        let err = scheduler
            .create_parallel_group(vec![a.clone(), "missing".to_string()], 2)
            .await;
        assert!(err.is_err());
        // The failed call must not have tagged `a`.
        assert!(scheduler.get(&a).await.unwrap().execution_group.is_none());

        let group_id = scheduler.create_parallel_group(vec![a.clone()], 2).await.unwrap();
        assert_eq!(
            scheduler.get(&a).await.unwrap().execution_group,
            Some(group_id.clone())
        );
        let group = scheduler.get_parallel_group(&group_id).await.unwrap();
        assert_eq!(group.task_ids, vec![a]);
        assert_eq!(group.max_concurrent, 2);
    }

    #[tokio::test]
    async fn test_mark_unknown_task() {
        let scheduler = TaskScheduler::new();
        assert!(!scheduler.mark_completed("missing").await);
        assert!(!scheduler.mark_failed("missing").await);
    }

    #[tokio::test]
    async fn test_remove_task() {
        let scheduler = TaskScheduler::new();
        let a = scheduler.schedule(TaskSpec::new("a")).await;
        assert!(scheduler.remove(&a).await);
        assert!(!scheduler.remove(&a).await);
        assert!(scheduler.get(&a).await.is_none());
    }
}
