//! Orchestrator: workflow registry and scheduling engine.
//!
//! Each `execute_workflow` call runs one scheduling loop. The loop is the
//! only place that mutates the workflow while it runs: tool calls execute as
//! tokio tasks in a `JoinSet` and report their outcome back through
//! `join_next`. Readiness is recomputed after every completion, and ready
//! tasks are dispatched up to the concurrency cap.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::task::{
    FailureKind, Params, Task, TaskFailure, TaskId, TaskPriority, TaskStatus, DEFAULT_MAX_RETRIES,
};
use crate::core::workflow::{StatusCounts, Workflow, WorkflowId, WorkflowStatus};
use crate::error::{Error, Result};
use crate::orchestration::executor::ToolExecutor;
use crate::orchestration::retry::{self, Transition};
use crate::orchestration::stats::{ExecutionStats, OrchestratorStats, WorkflowCounts};

/// Lifecycle events emitted while workflows run.
///
/// Delivery is best effort: a dropped receiver never stalls scheduling.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        tasks: usize,
    },
    TaskStarted {
        workflow_id: WorkflowId,
        task_id: TaskId,
        /// 1-based attempt number.
        attempt: u32,
    },
    TaskCompleted {
        workflow_id: WorkflowId,
        task_id: TaskId,
        /// Workflow progress after this completion.
        progress: f64,
    },
    TaskRetrying {
        workflow_id: WorkflowId,
        task_id: TaskId,
        attempt: u32,
        error: String,
    },
    TaskFailed {
        workflow_id: WorkflowId,
        task_id: TaskId,
        error: String,
    },
    TaskSkipped {
        workflow_id: WorkflowId,
        task_id: TaskId,
        progress: f64,
    },
    WorkflowFinished {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        progress: f64,
    },
}

/// Everything needed to add one task to a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub tool_name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Falls back to the orchestrator default when unset.
    #[serde(default, with = "crate::util::duration_secs")]
    pub timeout: Option<Duration>,
    /// Falls back to the orchestrator default when unset.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub label: Option<String>,
}

impl TaskSpec {
    pub fn new(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_dependencies<I: IntoIterator<Item = TaskId>>(mut self, deps: I) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

/// A terminally failed task, as reported in an [`ExecutionSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task_id: TaskId,
    pub task: String,
    pub tool_name: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub last_error: String,
}

impl FailureReport {
    fn from_task(task: &Task) -> Option<Self> {
        let failure = task.error.as_ref()?;
        Some(Self {
            task_id: task.id,
            task: task.display_name(),
            tool_name: task.tool_name.clone(),
            kind: failure.kind,
            attempts: task.attempts,
            last_error: failure.message.clone(),
        })
    }

    /// The failure as the error callers see once retries are exhausted.
    pub fn to_error(&self) -> Error {
        Error::RetryExhausted {
            task: self.task.clone(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }
}

/// Result of one `execute_workflow` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub progress: f64,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    pub tasks_cancelled: usize,
    /// Wall-clock seconds.
    pub execution_time: f64,
    /// Results of completed tasks, in insertion order.
    pub results: IndexMap<TaskId, Value>,
    pub failures: Vec<FailureReport>,
}

impl ExecutionSummary {
    fn from_workflow(workflow: &Workflow, elapsed: Duration) -> Self {
        let counts = workflow.status_counts();
        let results = workflow
            .tasks()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.result.clone().map(|r| (t.id, r)))
            .collect();
        let failures = workflow
            .tasks()
            .filter(|t| t.status == TaskStatus::Failed)
            .filter_map(FailureReport::from_task)
            .collect();

        Self {
            workflow_id: workflow.id,
            status: workflow.status(),
            progress: workflow.progress(),
            tasks_total: counts.total(),
            tasks_completed: counts.completed,
            tasks_failed: counts.failed,
            tasks_skipped: counts.skipped,
            tasks_cancelled: counts.cancelled,
            execution_time: elapsed.as_secs_f64(),
            results,
            failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// Per-task line of a [`WorkflowStatusReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub tool_name: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub retries: u32,
    pub max_retries: u32,
    pub attempts: u32,
    /// Seconds spent in the most recent attempt.
    pub duration: Option<f64>,
    pub error: Option<TaskFailure>,
}

impl From<&Task> for TaskReport {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            name: task.display_name(),
            tool_name: task.tool_name.clone(),
            status: task.status,
            priority: task.priority,
            retries: task.retries,
            max_retries: task.max_retries,
            attempts: task.attempts,
            duration: task.duration().map(|d| d.as_secs_f64()),
            error: task.error.clone(),
        }
    }
}

/// Answer to `get_workflow_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    pub progress: f64,
    pub counts: StatusCounts,
    pub tasks: Vec<TaskReport>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One line of `list_workflows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    pub progress: f64,
    pub task_count: usize,
    pub created_at: DateTime<Utc>,
}

struct WorkflowEntry {
    workflow: Workflow,
    /// Set while a scheduling loop runs this workflow.
    cancel: Option<CancellationToken>,
}

type Workflows = HashMap<WorkflowId, WorkflowEntry>;
type AttemptSet = JoinSet<(TaskId, std::result::Result<Value, TaskFailure>)>;

/// Owns a running loop's in-flight attempts.
///
/// If `execute_workflow` is dropped before it returns, the guard aborts the
/// attempts, releases their `active` slots and cancels the workflow so it
/// does not stay `Running`.
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
    workflow_id: WorkflowId,
    token: CancellationToken,
    in_flight: AttemptSet,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(orchestrator: &'a Orchestrator, workflow_id: WorkflowId, token: CancellationToken) -> Self {
        Self {
            orchestrator,
            workflow_id,
            token,
            in_flight: JoinSet::new(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.token.cancel();
        let abandoned = self.in_flight.len();
        self.in_flight.abort_all();
        self.orchestrator.active.fetch_sub(abandoned, Ordering::SeqCst);
        warn!(
            workflow = %self.workflow_id.short(),
            abandoned,
            "execution dropped before finishing"
        );

        let events = self.orchestrator.events.clone();
        if let Ok(mut workflows) = self.orchestrator.workflows.try_write() {
            abandon_run(&mut workflows, &self.workflow_id, events.as_ref());
            return;
        }
        // Lock is busy: finish the cleanup once it frees up.
        let workflows = Arc::clone(&self.orchestrator.workflows);
        let workflow_id = self.workflow_id;
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                let mut workflows = workflows.write().await;
                abandon_run(&mut workflows, &workflow_id, events.as_ref());
            });
        }
    }
}

/// Settle a workflow whose scheduling loop went away mid-run.
fn abandon_run(
    workflows: &mut Workflows,
    workflow_id: &WorkflowId,
    events: Option<&mpsc::UnboundedSender<OrchestratorEvent>>,
) {
    let Some(entry) = workflows.get_mut(workflow_id) else {
        return;
    };
    if entry.cancel.take().is_none() {
        return;
    }

    let workflow = &mut entry.workflow;
    if !workflow.is_finished() {
        if workflow.all_terminal() {
            workflow.mark_finished();
        } else {
            workflow.cancel();
        }
    }
    if let Some(tx) = events {
        let _ = tx.send(OrchestratorEvent::WorkflowFinished {
            workflow_id: *workflow_id,
            status: workflow.status(),
            progress: workflow.progress(),
        });
    }
}

/// Owns the workflows and runs them against a [`ToolExecutor`].
pub struct Orchestrator {
    workflows: Arc<RwLock<Workflows>>,
    executor: Arc<dyn ToolExecutor>,
    max_concurrent: usize,
    default_max_retries: u32,
    default_timeout: Option<Duration>,
    stats: RwLock<ExecutionStats>,
    active: AtomicUsize,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
}

impl Orchestrator {
    /// Create an orchestrator running at most `max_concurrent` tasks per
    /// workflow at a time.
    ///
    /// # Errors
    /// Returns a validation error if `max_concurrent` is zero.
    pub fn new(max_concurrent: usize, executor: Arc<dyn ToolExecutor>) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
            executor,
            max_concurrent,
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_timeout: None,
            stats: RwLock::new(ExecutionStats::default()),
            active: AtomicUsize::new(0),
            events: None,
        })
    }

    /// Create an orchestrator with the cap and task defaults from `config`.
    pub fn from_config(config: &Config, executor: Arc<dyn ToolExecutor>) -> Result<Self> {
        config.validate()?;
        let mut orchestrator = Self::new(config.max_concurrent_tasks, executor)?;
        orchestrator.default_max_retries = config.default_max_retries;
        orchestrator.default_timeout = config.default_task_timeout();
        Ok(orchestrator)
    }

    /// Send lifecycle events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub async fn create_workflow(&self, name: &str, description: &str) -> WorkflowId {
        let workflow = Workflow::new(name, description);
        let id = workflow.id;
        debug!(workflow = %id.short(), name, "workflow created");
        self.workflows.write().await.insert(
            id,
            WorkflowEntry {
                workflow,
                cancel: None,
            },
        );
        id
    }

    /// Add a task to a pending workflow.
    ///
    /// # Errors
    /// `NotFound` for an unknown workflow or dependency, `Validation` for an
    /// empty tool name, a zero timeout, or a workflow that already started.
    pub async fn add_task_to_workflow(&self, workflow_id: &WorkflowId, spec: TaskSpec) -> Result<TaskId> {
        if spec.tool_name.trim().is_empty() {
            return Err(Error::Validation("tool name must not be empty".to_string()));
        }
        if spec.timeout == Some(Duration::ZERO) {
            return Err(Error::Validation(format!(
                "timeout for {} must be greater than zero",
                spec.tool_name
            )));
        }

        let mut workflows = self.workflows.write().await;
        let workflow = &mut Self::entry_mut(&mut workflows, workflow_id)?.workflow;

        if let Some(missing) = spec.dependencies.iter().find(|d| !workflow.contains_task(d)) {
            return Err(Error::NotFound(format!("task {}", missing)));
        }

        let mut task = Task::new(&spec.tool_name, spec.params)
            .with_priority(spec.priority)
            .with_max_retries(spec.max_retries.unwrap_or(self.default_max_retries))
            .with_dependencies(spec.dependencies);
        if let Some(timeout) = spec.timeout.or(self.default_timeout) {
            task = task.with_timeout(timeout);
        }
        if let Some(label) = &spec.label {
            task = task.with_label(label);
        }
        workflow.add_task(task)
    }

    /// Make `task_id` wait on `dependency_id`. Cycles surface at execution.
    pub async fn add_dependency(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
        dependency_id: &TaskId,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        Self::entry_mut(&mut workflows, workflow_id)?
            .workflow
            .add_dependency(task_id, dependency_id)
    }

    fn entry_mut<'a>(
        workflows: &'a mut Workflows,
        id: &WorkflowId,
    ) -> Result<&'a mut WorkflowEntry> {
        workflows
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("workflow {}", id)))
    }

    /// Run a workflow to completion.
    ///
    /// Validation, cycle and deadlock errors abort the run. Task failures
    /// do not: they show up in the summary's status and `failures`.
    /// Cancellation ends the run with a `Cancelled` summary.
    pub async fn execute_workflow(&self, workflow_id: &WorkflowId) -> Result<ExecutionSummary> {
        let started = Instant::now();
        let token = CancellationToken::new();

        {
            let mut workflows = self.workflows.write().await;
            let entry = Self::entry_mut(&mut workflows, workflow_id)?;
            let workflow = &mut entry.workflow;
            if !workflow.accepts_changes() {
                return Err(Error::Validation(format!(
                    "workflow {} is {} and cannot be executed again",
                    workflow.name,
                    workflow.status()
                )));
            }
            workflow.validate_dag()?;
            workflow.mark_started();
            entry.cancel = Some(token.clone());

            info!(
                workflow = %workflow_id.short(),
                name = %workflow.name,
                tasks = workflow.task_count(),
                cap = self.max_concurrent,
                "workflow started"
            );
            self.emit(OrchestratorEvent::WorkflowStarted {
                workflow_id: *workflow_id,
                tasks: workflow.task_count(),
            });
        }

        let mut run = RunGuard::new(self, *workflow_id, token.clone());

        loop {
            {
                let mut workflows = self.workflows.write().await;
                let workflow = &mut Self::entry_mut(&mut workflows, workflow_id)?.workflow;
                if token.is_cancelled() || workflow.status() == WorkflowStatus::Cancelled {
                    break;
                }

                let slots = self.max_concurrent.saturating_sub(run.in_flight.len());
                let ready = workflow.ready_tasks(&workflow.completed_ids());
                for task_id in ready.into_iter().take(slots) {
                    self.dispatch(workflow, task_id, &token, &mut run.in_flight);
                }

                if run.in_flight.is_empty() {
                    if workflow.all_terminal() {
                        break;
                    }
                    let pending = workflow.fail_pending(TaskFailure::new(
                        FailureKind::Deadlock,
                        "task can never become ready",
                    ));
                    workflow.mark_finished();
                    warn!(workflow = %workflow_id.short(), ?pending, "deadlock detected");
                    self.finish(&mut workflows, workflow_id);
                    run.disarm();
                    return Err(Error::Deadlock { pending });
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                joined = run.in_flight.join_next() => match joined {
                    Some(Ok((task_id, outcome))) => {
                        self.active.fetch_sub(1, Ordering::SeqCst);
                        self.apply_outcome(workflow_id, task_id, outcome).await?;
                    }
                    Some(Err(join_err)) => {
                        self.active.fetch_sub(1, Ordering::SeqCst);
                        warn!(workflow = %workflow_id.short(), error = %join_err, "task join failed");
                    }
                    None => {}
                },
            }
        }

        if !run.in_flight.is_empty() {
            debug!(workflow = %workflow_id.short(), count = run.in_flight.len(), "aborting in-flight tasks");
            run.in_flight.abort_all();
            while run.in_flight.join_next().await.is_some() {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let mut workflows = self.workflows.write().await;
        let summary = {
            let workflow = &mut Self::entry_mut(&mut workflows, workflow_id)?.workflow;
            workflow.mark_finished();
            ExecutionSummary::from_workflow(workflow, started.elapsed())
        };
        self.finish(&mut workflows, workflow_id);
        run.disarm();

        info!(
            workflow = %workflow_id.short(),
            status = %summary.status,
            completed = summary.tasks_completed,
            failed = summary.tasks_failed,
            skipped = summary.tasks_skipped,
            elapsed = summary.execution_time,
            "workflow finished"
        );
        Ok(summary)
    }

    /// Clear the loop's token and announce the final status.
    fn finish(&self, workflows: &mut Workflows, workflow_id: &WorkflowId) {
        if let Some(entry) = workflows.get_mut(workflow_id) {
            entry.cancel = None;
            self.emit(OrchestratorEvent::WorkflowFinished {
                workflow_id: *workflow_id,
                status: entry.workflow.status(),
                progress: entry.workflow.progress(),
            });
        }
    }

    /// Start one attempt of `task_id` in the join set.
    fn dispatch(
        &self,
        workflow: &mut Workflow,
        task_id: TaskId,
        token: &CancellationToken,
        in_flight: &mut AttemptSet,
    ) {
        let Some(task) = workflow.task_mut(&task_id) else {
            return;
        };
        task.start();

        let attempt = task.attempts;
        let tool = task.tool_name.clone();
        let params = task.params.clone();
        let limit = task.timeout;
        let executor = Arc::clone(&self.executor);
        let cancel = token.child_token();

        debug!(task = %task.display_name(), tool = %tool, attempt, "task started");
        self.active.fetch_add(1, Ordering::SeqCst);
        self.emit(OrchestratorEvent::TaskStarted {
            workflow_id: workflow.id,
            task_id,
            attempt,
        });

        in_flight.spawn(async move {
            let signal = cancel.clone();
            let call = AssertUnwindSafe(async move { executor.execute(&tool, &params, cancel).await })
                .catch_unwind();

            let outcome = match limit {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        signal.cancel();
                        return (task_id, Err(TaskFailure::timeout(limit)));
                    }
                },
                None => call.await,
            };

            let outcome = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(failure_from_error(&err)),
                Err(panic) => Err(TaskFailure::execution(format!(
                    "tool panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };
            (task_id, outcome)
        });
    }

    /// Apply a finished attempt to the workflow and the statistics.
    async fn apply_outcome(
        &self,
        workflow_id: &WorkflowId,
        task_id: TaskId,
        outcome: std::result::Result<Value, TaskFailure>,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = &mut Self::entry_mut(&mut workflows, workflow_id)?.workflow;

        let Some(task) = workflow.task_mut(&task_id) else {
            return Ok(());
        };
        // Cancelled while the call was in flight.
        if task.status != TaskStatus::Running {
            return Ok(());
        }

        let transition = retry::next_transition(task, outcome);
        let name = task.display_name();
        let attempt = task.attempts;
        retry::apply(task, transition.clone());
        let duration = task.duration().unwrap_or_default();

        let mut skipped = Vec::new();
        match &transition {
            Transition::Complete(_) => {
                debug!(task = %name, attempt, ?duration, "task completed");
                self.stats.write().await.record_task(duration, false);
            }
            Transition::Retry(failure) => {
                warn!(task = %name, attempt, error = %failure, "task failed, retrying");
                self.stats.write().await.record_retry();
            }
            Transition::Fatal(failure) => {
                warn!(task = %name, attempts = attempt, error = %failure, "task failed");
                self.stats.write().await.record_task(duration, true);
                skipped = workflow.skip_dependents(&task_id)?;
                if !skipped.is_empty() {
                    debug!(task = %name, count = skipped.len(), "skipping dependents");
                }
            }
        }
        workflow.update_progress();

        let progress = workflow.progress();
        let workflow_id = *workflow_id;
        match transition {
            Transition::Complete(_) => self.emit(OrchestratorEvent::TaskCompleted {
                workflow_id,
                task_id,
                progress,
            }),
            Transition::Retry(failure) => self.emit(OrchestratorEvent::TaskRetrying {
                workflow_id,
                task_id,
                attempt,
                error: failure.to_string(),
            }),
            Transition::Fatal(failure) => self.emit(OrchestratorEvent::TaskFailed {
                workflow_id,
                task_id,
                error: failure.to_string(),
            }),
        }
        for task_id in skipped {
            self.emit(OrchestratorEvent::TaskSkipped {
                workflow_id,
                task_id,
                progress,
            });
        }
        Ok(())
    }

    pub async fn get_workflow_status(&self, workflow_id: &WorkflowId) -> Result<WorkflowStatusReport> {
        let workflows = self.workflows.read().await;
        let workflow = &workflows
            .get(workflow_id)
            .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow_id)))?
            .workflow;

        Ok(WorkflowStatusReport {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            status: workflow.status(),
            progress: workflow.progress(),
            counts: workflow.status_counts(),
            tasks: workflow.tasks().map(TaskReport::from).collect(),
            created_at: workflow.created_at,
            started_at: workflow.started_at(),
            finished_at: workflow.finished_at(),
        })
    }

    /// Cancel a workflow.
    ///
    /// Pending and running tasks become `Cancelled` and a running loop stops
    /// launching work and aborts what is in flight. Returns how many tasks
    /// were cancelled.
    ///
    /// # Errors
    /// `NotFound` for an unknown workflow, `Validation` if it already finished.
    pub async fn cancel_workflow(&self, workflow_id: &WorkflowId) -> Result<usize> {
        let mut workflows = self.workflows.write().await;
        let entry = Self::entry_mut(&mut workflows, workflow_id)?;
        if entry.workflow.is_finished() {
            return Err(Error::Validation(format!(
                "workflow {} already finished as {}",
                entry.workflow.name,
                entry.workflow.status()
            )));
        }

        let cancelled = entry.workflow.cancel();
        info!(workflow = %workflow_id.short(), tasks = cancelled.len(), "workflow cancelled");

        match &entry.cancel {
            Some(token) => token.cancel(),
            // No loop is running, so nobody else will announce it.
            None => self.emit(OrchestratorEvent::WorkflowFinished {
                workflow_id: *workflow_id,
                status: entry.workflow.status(),
                progress: entry.workflow.progress(),
            }),
        }
        Ok(cancelled.len())
    }

    pub async fn get_statistics(&self) -> OrchestratorStats {
        let mut workflows = WorkflowCounts::default();
        for entry in self.workflows.read().await.values() {
            workflows.record(entry.workflow.status());
        }
        let stats = self.stats.read().await;

        OrchestratorStats {
            workflows,
            tasks_executed: stats.tasks_executed,
            tasks_failed: stats.tasks_failed,
            total_retries: stats.total_retries,
            success_rate: stats.success_rate(),
            average_execution_time: stats.average_execution_time,
            active_tasks: self.active.load(Ordering::SeqCst),
            max_concurrent_tasks: self.max_concurrent,
        }
    }

    /// Snapshot of a workflow.
    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .map(|entry| entry.workflow.clone())
            .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow_id)))
    }

    /// All workflows, oldest first.
    pub async fn list_workflows(&self) -> Vec<WorkflowInfo> {
        let mut infos: Vec<WorkflowInfo> = self
            .workflows
            .read()
            .await
            .values()
            .map(|entry| WorkflowInfo {
                id: entry.workflow.id,
                name: entry.workflow.name.clone(),
                status: entry.workflow.status(),
                progress: entry.workflow.progress(),
                task_count: entry.workflow.task_count(),
                created_at: entry.workflow.created_at,
            })
            .collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Evict a workflow that is not running.
    pub async fn remove_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        let mut workflows = self.workflows.write().await;
        let entry = Self::entry_mut(&mut workflows, workflow_id)?;
        if entry.cancel.is_some() {
            return Err(Error::Validation(format!(
                "workflow {} is running",
                entry.workflow.name
            )));
        }
        let entry = workflows
            .remove(workflow_id)
            .ok_or_else(|| Error::NotFound(format!("workflow {}", workflow_id)))?;
        Ok(entry.workflow)
    }
}

fn failure_from_error(err: &Error) -> TaskFailure {
    match err {
        Error::Timeout(after) => TaskFailure::timeout(*after),
        other => TaskFailure::execution(other.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
