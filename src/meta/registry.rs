//! Catalog of meta-tools.
//!
//! A meta-tool is a parameterized recipe: its handler builds one or more
//! workflows through the orchestrator, runs them, and folds the task
//! results into a domain response. The registry validates parameters,
//! times the call and reports how many tasks completed, even on failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::task::Params;
use crate::error::{Error, Result};
use crate::meta::compose::MetaToolContext;
use crate::orchestration::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Catalog entry for a meta-tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    /// Rough duration in seconds.
    #[serde(default)]
    pub estimated_time: f64,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MetaToolDescriptor {
    pub fn new(name: &str, description: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            required_params: Vec::new(),
            optional_params: Vec::new(),
            estimated_time: 0.0,
            complexity: Complexity::Medium,
            tags: Vec::new(),
        }
    }

    pub fn requires<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn optional<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn estimated_time(mut self, secs: f64) -> Self {
        self.estimated_time = secs;
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Case-insensitive occurrences of `query` in name, description and tags.
    fn score(&self, query: &str) -> usize {
        let haystack = format!("{} {} {}", self.name, self.description, self.tags.join(" "))
            .to_lowercase();
        haystack.matches(query).count()
    }
}

/// Handler behind a meta-tool.
#[async_trait]
pub trait MetaToolHandler: Send + Sync {
    async fn run(&self, ctx: MetaToolContext, params: Params) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> MetaToolHandler for F
where
    F: Fn(MetaToolContext, Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn run(&self, ctx: MetaToolContext, params: Params) -> Result<Value> {
        self(ctx, params).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Result of `MetaToolRegistry::execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaToolResponse {
    pub tool: String,
    pub status: ResponseStatus,
    /// Seconds.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tasks_completed: usize,
}

impl MetaToolResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// One `search` hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub name: String,
    pub category: String,
    pub score: usize,
}

struct Entry {
    descriptor: MetaToolDescriptor,
    handler: Arc<dyn MetaToolHandler>,
}

/// Registry of meta-tools bound to one orchestrator.
pub struct MetaToolRegistry {
    orchestrator: Arc<Orchestrator>,
    entries: IndexMap<String, Entry>,
}

impl MetaToolRegistry {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            entries: IndexMap::new(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Register a meta-tool.
    ///
    /// # Errors
    /// Returns a validation error for an empty or already registered name.
    pub fn register<H>(&mut self, descriptor: MetaToolDescriptor, handler: H) -> Result<()>
    where
        H: MetaToolHandler + 'static,
    {
        if descriptor.name.trim().is_empty() {
            return Err(Error::Validation("meta-tool name must not be empty".to_string()));
        }
        if self.entries.contains_key(&descriptor.name) {
            return Err(Error::Validation(format!(
                "meta-tool {} is already registered",
                descriptor.name
            )));
        }
        self.entries.insert(
            descriptor.name.clone(),
            Entry {
                descriptor,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<&MetaToolDescriptor> {
        self.entries.values().map(|e| &e.descriptor).collect()
    }

    pub fn describe(&self, name: &str) -> Result<&MetaToolDescriptor> {
        self.entries
            .get(name)
            .map(|e| &e.descriptor)
            .ok_or_else(|| Error::NotFound(format!("meta-tool {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every required parameter is present and not null.
    pub fn validate_params(&self, name: &str, params: &Params) -> Result<()> {
        let descriptor = self.describe(name)?;
        let missing: Vec<&str> = descriptor
            .required_params
            .iter()
            .filter(|p| params.get(p.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "{} is missing required parameter(s): {}",
                name,
                missing.join(", ")
            )))
        }
    }

    /// Rank meta-tools by how often `query` occurs in their name,
    /// description and tags, ignoring case. Tools that never mention it are
    /// left out; ties keep registration order.
    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<SearchMatch> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<SearchMatch> = self
            .entries
            .values()
            .map(|e| &e.descriptor)
            .filter(|d| category.map_or(true, |c| d.category.eq_ignore_ascii_case(c)))
            .filter_map(|d| {
                let score = d.score(&query);
                (score > 0).then(|| SearchMatch {
                    name: d.name.clone(),
                    category: d.category.clone(),
                    score,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches
    }

    /// Run a meta-tool. Failures are reported in the response, never
    /// returned as errors.
    pub async fn execute(&self, name: &str, params: Params) -> MetaToolResponse {
        let started = Instant::now();
        let ctx = MetaToolContext::new(Arc::clone(&self.orchestrator));

        let outcome = match self.entries.get(name) {
            None => Err(Error::NotFound(format!("meta-tool {}", name))),
            Some(entry) => match self.validate_params(name, &params) {
                Ok(()) => {
                    info!(tool = name, "running meta-tool");
                    entry.handler.run(ctx.clone(), params).await
                }
                Err(err) => Err(err),
            },
        };

        let execution_time = started.elapsed().as_secs_f64();
        let tasks_completed = ctx.tasks_completed();
        match outcome {
            Ok(result) => {
                info!(tool = name, tasks_completed, execution_time, "meta-tool finished");
                MetaToolResponse {
                    tool: name.to_string(),
                    status: ResponseStatus::Success,
                    execution_time,
                    result: Some(result),
                    error: None,
                    tasks_completed,
                }
            }
            Err(err) => {
                warn!(tool = name, tasks_completed, error = %err, "meta-tool failed");
                MetaToolResponse {
                    tool: name.to_string(),
                    status: ResponseStatus::Error,
                    execution_time,
                    result: None,
                    error: Some(err.to_string()),
                    tasks_completed,
                }
            }
        }
    }
}
