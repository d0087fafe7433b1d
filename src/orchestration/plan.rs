//! Label-addressed workflow descriptions.
//!
//! A plan names its steps and wires them by label, so it can be written by
//! hand as JSON or assembled by a meta-tool without knowing task ids.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::core::task::{Params, TaskId, TaskPriority};
use crate::core::workflow::WorkflowId;
use crate::error::{Error, Result};
use crate::orchestration::scheduler::{Orchestrator, TaskSpec};

/// One step of a [`WorkflowPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub label: String,
    pub tool: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl PlanStep {
    pub fn new(label: &str, tool: &str) -> Self {
        Self {
            label: label.to_string(),
            tool: tool.to_string(),
            params: Params::new(),
            depends_on: Vec::new(),
            priority: TaskPriority::Normal,
            timeout_secs: None,
            max_retries: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn after(mut self, label: &str) -> Self {
        self.depends_on.push(label.to_string());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout_secs {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(Error::Validation(format!(
                "step {}: invalid timeout {}",
                self.label, secs
            ))),
        }
    }
}

/// A named set of steps that becomes one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<PlanStep>,
}

impl WorkflowPlan {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Read a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check labels and timeouts without touching an orchestrator.
    ///
    /// Cycles are left to `Workflow::validate_dag`.
    pub fn check(&self) -> Result<()> {
        let mut labels = HashSet::new();
        for step in &self.steps {
            if step.label.trim().is_empty() {
                return Err(Error::Validation("plan step without a label".to_string()));
            }
            if !labels.insert(step.label.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate step label: {}",
                    step.label
                )));
            }
            step.timeout()?;
        }
        for step in &self.steps {
            if let Some(missing) = step.depends_on.iter().find(|d| !labels.contains(d.as_str())) {
                return Err(Error::Validation(format!(
                    "step {} depends on unknown step {}",
                    step.label, missing
                )));
            }
        }
        Ok(())
    }
}

impl Orchestrator {
    /// Create a workflow from a plan.
    ///
    /// Returns the workflow id and the task id of every step, keyed by
    /// label in step order.
    pub async fn create_from_plan(
        &self,
        plan: &WorkflowPlan,
    ) -> Result<(WorkflowId, IndexMap<String, TaskId>)> {
        plan.check()?;

        let workflow_id = self.create_workflow(&plan.name, &plan.description).await;
        let mut ids = IndexMap::new();
        for step in &plan.steps {
            let mut spec = TaskSpec::new(&step.tool)
                .with_label(&step.label)
                .with_params(step.params.clone())
                .with_priority(step.priority);
            if let Some(timeout) = step.timeout()? {
                spec = spec.with_timeout(timeout);
            }
            if let Some(max_retries) = step.max_retries {
                spec = spec.with_max_retries(max_retries);
            }
            let task_id = self.add_task_to_workflow(&workflow_id, spec).await?;
            ids.insert(step.label.clone(), task_id);
        }

        // Second pass so steps may refer to later ones.
        for step in &plan.steps {
            for dep in &step.depends_on {
                if let (Some(task), Some(dependency)) = (ids.get(&step.label), ids.get(dep)) {
                    self.add_dependency(&workflow_id, task, dependency).await?;
                }
            }
        }

        Ok((workflow_id, ids))
    }
}
