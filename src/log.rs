//! Logging setup for siteflow.
//!
//! Everything logs through `tracing`. Levels:
//! - ERROR: the CLI could not complete a command
//! - WARN: task failures, retries, deadlocks
//! - INFO: workflow lifecycle (started, finished, cancelled)
//! - DEBUG: per-task transitions, config loading
//!
//! Debug mode can be enabled with `--debug` flag or `SITEFLOW_DEBUG=1` env var.
//! `RUST_LOG` overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

fn env_debug() -> bool {
    std::env::var("SITEFLOW_DEBUG")
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "siteflow=debug"
    } else {
        "siteflow=info"
    }
}

/// Path of the log file, `~/.siteflow/siteflow.log`.
pub fn log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".siteflow").join("siteflow.log"))
}

/// Initialize logging with explicit debug mode setting.
///
/// The log file is truncated on startup. Without a home directory, logs
/// go to stderr. Returns the log file path when one is used.
pub fn init_with_debug(debug: bool) -> Option<PathBuf> {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let file = log_path().and_then(|path| {
        let dir = path.parent()?;
        std::fs::create_dir_all(dir).ok()?;
        File::create(&path).ok().map(|file| (path, file))
    });

    match file {
        Some((path, file)) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
            Some(path)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}
