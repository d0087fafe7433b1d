//! Helpers meta-tool handlers use to build and run workflows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::core::task::TaskId;
use crate::core::workflow::WorkflowStatus;
use crate::error::{Error, Result};
use crate::orchestration::{ExecutionSummary, Orchestrator, WorkflowPlan};

/// Handed to every meta-tool handler invocation.
///
/// Counts the tasks completed across every workflow the handler runs, so
/// the response can report partial progress even when the handler fails.
#[derive(Clone)]
pub struct MetaToolContext {
    orchestrator: Arc<Orchestrator>,
    tasks_completed: Arc<AtomicUsize>,
}

impl MetaToolContext {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            tasks_completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn tasks_completed(&self) -> usize {
        self.tasks_completed.load(Ordering::SeqCst)
    }

    /// Record tasks completed outside `run_plan`.
    pub fn add_completed(&self, count: usize) {
        self.tasks_completed.fetch_add(count, Ordering::SeqCst);
    }

    /// Build a workflow from `plan` and run it.
    ///
    /// Task failures come back inside the outcome; use
    /// [`PlanOutcome::require`] to turn them into an error.
    pub async fn run_plan(&self, plan: &WorkflowPlan) -> Result<PlanOutcome> {
        let (workflow_id, labels) = self.orchestrator.create_from_plan(plan).await?;
        debug!(workflow = %workflow_id.short(), plan = %plan.name, "running plan");

        let summary = match self.orchestrator.execute_workflow(&workflow_id).await {
            Ok(summary) => summary,
            Err(err) => {
                if let Ok(report) = self.orchestrator.get_workflow_status(&workflow_id).await {
                    self.add_completed(report.counts.completed);
                }
                return Err(err);
            }
        };
        self.add_completed(summary.tasks_completed);

        let results = labels
            .iter()
            .filter_map(|(label, id)| summary.results.get(id).map(|v| (label.clone(), v.clone())))
            .collect();

        Ok(PlanOutcome {
            name: plan.name.clone(),
            summary,
            labels,
            results,
        })
    }

    /// Run plans one after another, stopping after the first phase that
    /// does not complete. The failed phase is the last outcome returned.
    pub async fn run_phases(&self, plans: &[WorkflowPlan]) -> Result<Vec<PlanOutcome>> {
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in plans {
            let outcome = self.run_plan(plan).await?;
            let done = outcome.summary.is_success();
            outcomes.push(outcome);
            if !done {
                break;
            }
        }
        Ok(outcomes)
    }
}

/// A finished plan run.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub name: String,
    pub summary: ExecutionSummary,
    /// Task id of every step, keyed by label.
    pub labels: IndexMap<String, TaskId>,
    /// Results of completed steps, keyed by label.
    pub results: IndexMap<String, Value>,
}

impl PlanOutcome {
    pub fn result(&self, label: &str) -> Option<&Value> {
        self.results.get(label)
    }

    /// The outcome if the workflow completed, otherwise the first failure.
    pub fn require(self) -> Result<Self> {
        match self.summary.status {
            WorkflowStatus::Completed => Ok(self),
            WorkflowStatus::Cancelled => Err(Error::Cancelled(self.name)),
            status => Err(match self.summary.failures.first() {
                Some(failure) => failure.to_error(),
                None => Error::Execution(format!("plan {} ended {}", self.name, status)),
            }),
        }
    }
}
