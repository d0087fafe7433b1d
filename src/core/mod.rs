//! Core domain models: tasks, their dependency graph, and workflows.

pub mod dag;
pub mod task;
pub mod workflow;

pub use dag::TaskDAG;
pub use task::{FailureKind, Params, Task, TaskFailure, TaskId, TaskPriority, TaskStatus};
pub use workflow::{StatusCounts, Workflow, WorkflowId, WorkflowStatus};
