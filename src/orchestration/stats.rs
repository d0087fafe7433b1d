//! Orchestrator-wide execution statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::workflow::WorkflowStatus;

/// Running counters, updated by scheduling loops as tasks finish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    /// Tasks that reached `Completed` or terminal `Failed`.
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    /// Attempts that were retried.
    pub total_retries: u64,
    /// Incremental mean of the final attempt's duration, in seconds.
    pub average_execution_time: f64,
}

impl ExecutionStats {
    /// Record a task reaching a terminal executed state.
    pub fn record_task(&mut self, duration: Duration, failed: bool) {
        self.tasks_executed += 1;
        if failed {
            self.tasks_failed += 1;
        }
        let n = self.tasks_executed as f64;
        self.average_execution_time =
            (self.average_execution_time * (n - 1.0) + duration.as_secs_f64()) / n;
    }

    pub fn record_retry(&mut self) {
        self.total_retries += 1;
    }

    /// `(executed - failed) / executed`, or 0 before anything ran.
    pub fn success_rate(&self) -> f64 {
        if self.tasks_executed == 0 {
            return 0.0;
        }
        (self.tasks_executed - self.tasks_failed) as f64 / self.tasks_executed as f64
    }
}

/// Workflow counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl WorkflowCounts {
    pub fn record(&mut self, status: WorkflowStatus) {
        self.total += 1;
        match status {
            WorkflowStatus::Pending => self.pending += 1,
            WorkflowStatus::Running => self.running += 1,
            WorkflowStatus::Completed => self.completed += 1,
            WorkflowStatus::Failed => self.failed += 1,
            WorkflowStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Snapshot returned by `Orchestrator::get_statistics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub workflows: WorkflowCounts,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub total_retries: u64,
    pub success_rate: f64,
    /// Seconds.
    pub average_execution_time: f64,
    /// Tasks in flight across every running workflow.
    pub active_tasks: usize,
    pub max_concurrent_tasks: usize,
}
