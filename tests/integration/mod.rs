//! Integration test suite for siteflow.
//!
//! These tests drive the orchestrator through its public surface with a
//! scripted tool executor, verifying scheduling order, concurrency bounds,
//! retry and timeout handling, cancellation and the meta-tool layer.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Full workflow execution tests
//! - `concurrency`: Concurrency cap and priority ordering
//! - `retry_timeout`: Retry budget and per-task timeouts
//! - `cancellation`: Cooperative cancellation of running workflows
//! - `failure_propagation`: Skips, cycles and progress tracking
//! - `meta_tools`: Meta-tool registry and composition


mod concurrency;
mod cancellation;
mod failure_propagation;
mod meta_tools;
