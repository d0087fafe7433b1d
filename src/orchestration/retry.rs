//! Retry policy as an explicit transition.
//!
//! Each finished attempt is classified once; the scheduling loop applies the
//! transition and, for `Retry`, simply leaves the task pending for the next
//! pass. Nothing recurses.

use serde_json::Value;

use crate::core::task::{Task, TaskFailure};

/// What the scheduling loop does with a finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The tool produced a result.
    Complete(Value),
    /// The attempt failed inside the retry budget.
    Retry(TaskFailure),
    /// The attempt failed and the budget is spent.
    Fatal(TaskFailure),
}

/// Classify an attempt outcome against the task's retry budget.
///
/// A task may fail `max_retries` times and still be retried, so it is
/// attempted at most `max_retries + 1` times.
pub fn next_transition(task: &Task, outcome: Result<Value, TaskFailure>) -> Transition {
    match outcome {
        Ok(value) => Transition::Complete(value),
        Err(failure) if task.retries < task.max_retries => Transition::Retry(failure),
        Err(failure) => Transition::Fatal(failure),
    }
}

/// Apply a transition to the task.
pub fn apply(task: &mut Task, transition: Transition) {
    match transition {
        Transition::Complete(value) => task.complete(value),
        Transition::Retry(failure) => task.requeue(failure),
        Transition::Fatal(failure) => task.fail(failure),
    }
}
