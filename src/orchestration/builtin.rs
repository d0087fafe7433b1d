//! Built-in development tools: `echo`, `sleep` and `fail`.

use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::task::Params;
use crate::error::{Error, Result};
use crate::orchestration::executor::ToolRegistry;

/// A registry with the built-in tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register("echo", echo)
        .register("sleep", sleep)
        .register_blocking("fail", fail);
    registry
}

/// Returns its params unchanged.
async fn echo(params: Params, _cancel: CancellationToken) -> Result<Value> {
    Ok(Value::Object(params))
}

/// Waits `ms` milliseconds (default 100) unless cancelled.
async fn sleep(params: Params, cancel: CancellationToken) -> Result<Value> {
    let ms = match params.get("ms") {
        None => 100,
        Some(value) => value
            .as_u64()
            .ok_or_else(|| Error::Validation(format!("sleep: ms must be a non-negative integer, got {}", value)))?,
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({ "slept_ms": ms })),
        _ = cancel.cancelled() => Err(Error::Cancelled("sleep".to_string())),
    }
}

/// Always fails with `message`.
fn fail(params: Params) -> Result<Value> {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("requested failure");
    Err(Error::Execution(message.to_string()))
}
