use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicGraph { cycle: Vec<String> },

    #[error("Deadlock: {} pending task(s) can never become ready: {}", pending.len(), pending.join(", "))]
    Deadlock { pending: Vec<String> },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Task {task} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        task: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
