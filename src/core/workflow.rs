//! Workflow: a named DAG of tasks with derived status and progress.
//!
//! Tasks are kept in insertion order. That order is the tie-break between
//! ready tasks of equal priority, so scheduling is reproducible.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::dag::TaskDAG;
use crate::core::task::{Task, TaskFailure, TaskId, TaskStatus};
use crate::error::{Error, Result};

/// Unique identifier for a workflow instance.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status of a workflow, derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not yet executed
    #[default]
    Pending,
    /// Execution in progress
    Running,
    /// Every task completed or was skipped
    Completed,
    /// At least one task failed terminally
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled + self.skipped
    }

    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::Skipped => self.skipped += 1,
        }
    }
}

/// A named DAG of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: String,
    tasks: IndexMap<TaskId, Task>,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    status: WorkflowStatus,
    progress: f64,
}

impl Workflow {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.to_string(),
            description: description.to_string(),
            tasks: IndexMap::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: WorkflowStatus::Pending,
            progress: 0.0,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Percentage of tasks completed or skipped, 0 to 100.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// True until the workflow has been started or cancelled.
    pub fn accepts_changes(&self) -> bool {
        self.status == WorkflowStatus::Pending && self.started_at.is_none() && self.finished_at.is_none()
    }

    /// True once the workflow reached its final status.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Add a task.
    ///
    /// # Errors
    /// Returns a validation error if the workflow has already started or
    /// the task id is already present.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        if !self.accepts_changes() {
            return Err(Error::Validation(format!(
                "Workflow {} is {} and no longer accepts tasks",
                self.name, self.status
            )));
        }
        if self.tasks.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "Task {} already exists in workflow {}",
                task.id, self.name
            )));
        }
        let id = task.id;
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Make `task_id` wait on `dependency_id`.
    ///
    /// Cycles are not checked here; run `validate_dag` before execution.
    pub fn add_dependency(&mut self, task_id: &TaskId, dependency_id: &TaskId) -> Result<()> {
        if !self.accepts_changes() {
            return Err(Error::Validation(format!(
                "Workflow {} is {} and no longer accepts dependencies",
                self.name, self.status
            )));
        }
        if !self.tasks.contains_key(dependency_id) {
            return Err(Error::NotFound(format!("task {}", dependency_id)));
        }
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        task.add_dependency(*dependency_id);
        Ok(())
    }

    /// Build the dependency graph.
    pub fn dag(&self) -> Result<TaskDAG> {
        TaskDAG::from_tasks(self.tasks.values())
    }

    /// Check that every dependency exists and that there is no cycle.
    ///
    /// # Errors
    /// `Validation` for unknown dependency ids, `CyclicGraph` with the
    /// offending path (task names) for cycles.
    pub fn validate_dag(&self) -> Result<()> {
        let dag = self.dag()?;
        if let Some(cycle) = dag.find_cycle() {
            return Err(Error::CyclicGraph {
                cycle: cycle
                    .iter()
                    .map(|id| {
                        self.tasks
                            .get(id)
                            .map(|t| t.display_name())
                            .unwrap_or_else(|| id.short())
                    })
                    .collect(),
            });
        }
        Ok(())
    }

    /// Ids of completed and skipped tasks.
    pub fn completed_ids(&self) -> HashSet<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.status.is_done())
            .map(|t| t.id)
            .collect()
    }

    /// Ready tasks, highest priority first, ties in insertion order.
    pub fn ready_tasks(&self, completed: &HashSet<TaskId>) -> Vec<TaskId> {
        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.is_ready(completed))
            .collect();
        // sort_by is stable, so equal priorities keep insertion order
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready.into_iter().map(|t| t.id).collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.values() {
            counts.record(task.status);
        }
        counts
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.is_finished())
    }

    /// Recompute progress and status from the tasks.
    ///
    /// `Cancelled` is sticky. Otherwise a terminally failed task makes the
    /// workflow `Failed` before the progress-based classification applies.
    pub fn update_progress(&mut self) {
        let counts = self.status_counts();
        let total = counts.total();
        let done = counts.completed + counts.skipped;

        self.progress = if total == 0 {
            100.0
        } else {
            100.0 * done as f64 / total as f64
        };

        if self.status == WorkflowStatus::Cancelled {
            return;
        }

        let started = self.started_at.is_some() || counts.pending < total;
        self.status = if counts.failed > 0 {
            WorkflowStatus::Failed
        } else if started && done == total {
            WorkflowStatus::Completed
        } else if started {
            WorkflowStatus::Running
        } else {
            WorkflowStatus::Pending
        };
    }

    pub(crate) fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
        self.update_progress();
    }

    pub(crate) fn mark_finished(&mut self) {
        self.update_progress();
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Skip every pending task that transitively waits on `failed`.
    ///
    /// Returns the skipped ids in insertion order.
    pub fn skip_dependents(&mut self, failed: &TaskId) -> Result<Vec<TaskId>> {
        let upstream = self
            .tasks
            .get(failed)
            .map(|t| t.display_name())
            .ok_or_else(|| Error::NotFound(format!("task {}", failed)))?;

        let mut skipped = Vec::new();
        for id in self.dag()?.transitive_dependents(failed) {
            if let Some(task) = self.tasks.get_mut(&id) {
                if task.status == TaskStatus::Pending {
                    task.skip(&upstream);
                    skipped.push(id);
                }
            }
        }
        Ok(skipped)
    }

    /// Cancel the workflow: pending and running tasks become `Cancelled`.
    ///
    /// Returns the ids of the tasks that were cancelled.
    pub fn cancel(&mut self) -> Vec<TaskId> {
        let mut cancelled = Vec::new();
        for task in self.tasks.values_mut() {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
                task.cancel();
                cancelled.push(task.id);
            }
        }
        self.status = WorkflowStatus::Cancelled;
        self.mark_finished();
        cancelled
    }

    /// Fail every pending task as unreachable. Used when the scheduler
    /// finds pending work that can never become ready.
    pub(crate) fn fail_pending(&mut self, failure: TaskFailure) -> Vec<String> {
        let mut names = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Pending {
                names.push(task.display_name());
                task.fail(failure.clone());
            }
        }
        names
    }
}
