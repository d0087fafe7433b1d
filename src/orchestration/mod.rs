//! Orchestration layer.
//!
//! The [`Orchestrator`] owns workflows and runs them against a
//! [`ToolExecutor`], applying the retry policy and keeping statistics.
//! Plans and the built-in tools are the usual way to feed it work.

pub mod builtin;
mod executor;
mod plan;
pub mod retry;
mod scheduler;
mod stats;

pub use builtin::builtin_registry;
pub use executor::{ToolExecutor, ToolRegistry};
pub use plan::{PlanStep, WorkflowPlan};
pub use scheduler::{
    ExecutionSummary, FailureReport, Orchestrator, OrchestratorEvent, TaskReport, TaskSpec,
    WorkflowInfo, WorkflowStatusReport,
};
pub use stats::{ExecutionStats, OrchestratorStats, WorkflowCounts};
