//! Tool execution capability.
//!
//! The orchestrator never knows which concrete tools exist. It hands a tool
//! name and its parameters to a [`ToolExecutor`] and gets back a JSON value
//! or an error. [`ToolRegistry`] is the stock adapter: a name-to-handler map
//! built explicitly at the composition root.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::task::Params;
use crate::error::{Error, Result};
use crate::util::blocking;

/// The Task-Execution capability.
///
/// Implementations should return promptly once `cancel` fires. The
/// orchestrator also drops the future on cancellation, so ignoring the
/// token only delays cleanup of blocking work.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, params: &Params, cancel: CancellationToken)
        -> Result<Value>;
}

type ToolFn = Arc<dyn Fn(Params, CancellationToken) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registry mapping tool names to handlers.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, ToolFn>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler. Replaces any handler with the same name.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Params, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: ToolFn = Arc::new(move |params, cancel| handler(params, cancel).boxed());
        self.handlers.insert(name.to_string(), handler);
        self
    }

    /// Register a synchronous handler. It runs on the blocking pool.
    pub fn register_blocking<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Params) -> Result<Value> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |params, _cancel| {
            let handler = Arc::clone(&handler);
            async move { blocking(move || handler(params)).await }
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        params: &Params,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let handler = self
            .handlers
            .get(tool_name)
            .cloned()
            .ok_or_else(|| Error::Execution(format!("unknown tool: {}", tool_name)))?;
        handler(params.clone(), cancel).await
    }
}
