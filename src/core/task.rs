//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work in a workflow. Each task wraps one
//! tool invocation and tracks its status, retry budget, timing, and result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Parameters passed to a tool. Opaque to the orchestrator.
pub type Params = serde_json::Map<String, Value>;

/// Default retry budget for a task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a task within a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`. A failed attempt
/// inside the retry budget sends the task back to `Pending`. `Skipped` marks
/// tasks whose upstream dependency terminally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or a free slot.
    #[default]
    Pending,
    /// The tool is currently being invoked.
    Running,
    /// The tool returned a result.
    Completed,
    /// The retry budget is exhausted.
    Failed,
    /// The workflow was cancelled before this task finished.
    Cancelled,
    /// An upstream dependency failed, so this task never ran.
    Skipped,
}

impl TaskStatus {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Skipped
        )
    }

    /// Statuses that count towards workflow progress and satisfy dependents.
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Scheduling preference used when ready tasks compete for slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Why a task attempt did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tool returned an error or panicked.
    Execution,
    /// The tool did not answer within the task timeout.
    Timeout,
    /// A dependency terminally failed.
    UpstreamFailed,
    /// The workflow was cancelled.
    Cancelled,
    /// The task could never become ready.
    Deadlock,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Execution => write!(f, "execution"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::UpstreamFailed => write!(f, "upstream_failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// Error recorded on a task, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Execution, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(FailureKind::Timeout, format!("timed out after {:?}", after))
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A single task in a workflow.
///
/// Tasks wrap one tool invocation. They carry their dependency ids, the
/// retry budget and timeout, and the outcome of the most recent attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Optional human-readable label (plan step name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Name of the tool to invoke.
    pub tool_name: String,
    /// Parameters handed to the tool.
    #[serde(default)]
    pub params: Params,
    /// Tasks that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Current execution status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Tool output on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Most recent failure, if any.
    #[serde(default)]
    pub error: Option<TaskFailure>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Per-attempt time limit.
    #[serde(default, with = "crate::util::duration_secs")]
    pub timeout: Option<Duration>,
    /// Retries consumed so far.
    #[serde(default)]
    pub retries: u32,
    pub max_retries: u32,
    /// Number of times the tool was invoked.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// When the most recent attempt started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the most recent attempt ended.
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task for the given tool.
    pub fn new(tool_name: &str, params: Params) -> Self {
        Self {
            id: TaskId::new(),
            label: None,
            tool_name: tool_name.to_string(),
            params,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            priority: TaskPriority::Normal,
            timeout: None,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            attempts: 0,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
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
        self.max_retries = max_retries;
        self
    }

    pub fn with_dependencies<I: IntoIterator<Item = TaskId>>(mut self, deps: I) -> Self {
        for dep in deps {
            self.add_dependency(dep);
        }
        self
    }

    /// Record a dependency. Returns false if it was already present.
    pub fn add_dependency(&mut self, dep: TaskId) -> bool {
        if self.dependencies.contains(&dep) {
            return false;
        }
        self.dependencies.push(dep);
        true
    }

    /// Label for logs and diagnostics: the plan label, or tool name plus short id.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{}[{}]", self.tool_name, self.id.short()),
        }
    }

    /// A pending task whose dependencies are all completed or skipped.
    pub fn is_ready(&self, completed: &HashSet<TaskId>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    /// Begin an attempt.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.start_time = Some(Utc::now());
        self.end_time = None;
    }

    /// Record a successful result.
    pub fn complete(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.end_time = Some(Utc::now());
    }

    /// Terminal failure.
    pub fn fail(&mut self, failure: TaskFailure) {
        self.status = TaskStatus::Failed;
        self.error = Some(failure);
        self.end_time = Some(Utc::now());
    }

    /// Failed attempt inside the retry budget: back to pending.
    pub fn requeue(&mut self, failure: TaskFailure) {
        self.retries += 1;
        self.status = TaskStatus::Pending;
        self.error = Some(failure);
        self.end_time = Some(Utc::now());
    }

    /// Mark as skipped because `upstream` failed.
    pub fn skip(&mut self, upstream: &str) {
        self.status = TaskStatus::Skipped;
        self.error = Some(TaskFailure::new(
            FailureKind::UpstreamFailed,
            format!("upstream task {} failed", upstream),
        ));
    }

    /// Mark as cancelled. Running attempts get an end time.
    pub fn cancel(&mut self) {
        if self.status == TaskStatus::Running {
            self.end_time = Some(Utc::now());
        }
        self.status = TaskStatus::Cancelled;
        self.error = Some(TaskFailure::new(FailureKind::Cancelled, "workflow cancelled"));
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration of the most recent attempt.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}
