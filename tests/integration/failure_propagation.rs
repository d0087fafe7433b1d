//! Failure propagation, graph validation and progress tests.

use std::sync::Arc;

use serde_json::json;

use siteflow::core::{FailureKind, TaskStatus, WorkflowStatus};
use siteflow::orchestration::TaskSpec;
use siteflow::Error;

use crate::fixtures::{guarded, progress_trace, Harness};

/// Test: failure skips the failed task's descendants only
/// Given a -> b -> c where a always fails, plus an independent x -> y
/// When the workflow executes
/// Then b and c are skipped, x and y complete, and the workflow fails
#[tokio::test]
async fn test_failure_skips_transitive_dependents() {
    let mut harness = Harness::new(2);
    let wf = harness.workflow("propagate").await;

    let a = harness
        .add_spec(&wf, "a", &[], json!({"always_fail": true}), |s| s.with_max_retries(0))
        .await;
    let b = harness.add(&wf, "b", &[a], json!({})).await;
    let c = harness.add(&wf, "c", &[b], json!({})).await;
    let x = harness.add(&wf, "x", &[], json!({"delay_ms": 10})).await;
    let y = harness.add(&wf, "y", &[x], json!({})).await;

    let summary = guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();

    assert_eq!(summary.status, WorkflowStatus::Failed);
    assert_eq!(summary.tasks_failed, 1);
    assert_eq!(summary.tasks_skipped, 2);
    assert_eq!(summary.tasks_completed, 2);
    assert_eq!(summary.progress, 80.0);
    assert_eq!(summary.results.keys().copied().collect::<Vec<_>>(), vec![x, y]);

    let workflow = harness.orchestrator.get_workflow(&wf).await.unwrap();
    assert_eq!(workflow.task(&a).unwrap().status, TaskStatus::Failed);
    for id in [b, c] {
        let task = workflow.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Skipped);
        assert_eq!(task.error.as_ref().unwrap().kind, FailureKind::UpstreamFailed);
        assert_eq!(task.attempts, 0);
    }
    assert!(workflow.tasks().all(|t| t.is_finished()));

    assert!(harness.executor.position("start:b").is_none());
    assert!(harness.executor.position("start:c").is_none());

    let trace = progress_trace(&harness.drain_events());
    assert!(trace.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", trace);
    assert_eq!(trace.last().copied(), Some(80.0));
}

#[tokio::test]
async fn test_progress_is_monotonic_to_completion() {
    let mut harness = Harness::new(3);
    let wf = harness.workflow("progress").await;

    let root = harness.add(&wf, "root", &[], json!({})).await;
    let left = harness.add(&wf, "left", &[root], json!({"fail_times": 1})).await;
    let right = harness.add(&wf, "right", &[root], json!({"delay_ms": 5})).await;
    harness.add(&wf, "join", &[left, right], json!({})).await;

    let summary = guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();
    assert!(summary.is_success());

    let trace = progress_trace(&harness.drain_events());
    assert!(trace.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", trace);
    assert_eq!(trace.first().copied(), Some(25.0));
    assert_eq!(trace.last().copied(), Some(100.0));
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_call() {
    let harness = Harness::new(2);
    let wf = harness.workflow("cycle").await;

    let a = harness.add(&wf, "a", &[], json!({})).await;
    let b = harness.add(&wf, "b", &[a], json!({})).await;
    let c = harness.add(&wf, "c", &[b], json!({})).await;
    harness.orchestrator.add_dependency(&wf, &a, &c).await.unwrap();

    let err = harness.orchestrator.execute_workflow(&wf).await.unwrap_err();

    match err {
        Error::CyclicGraph { cycle } => {
            assert_eq!(cycle.first(), cycle.last());
            assert_eq!(cycle.len(), 4);
            for name in ["a", "b", "c"] {
                assert!(cycle.iter().any(|n| n == name));
            }
        }
        other => panic!("expected CyclicGraph, got {:?}", other),
    }
    assert!(harness.executor.log().is_empty());
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let harness = Harness::new(1);
    let wf = harness.workflow("self").await;
    let a = harness.add(&wf, "a", &[], json!({})).await;

    harness.orchestrator.add_dependency(&wf, &a, &a).await.unwrap();

    assert!(matches!(
        harness.orchestrator.execute_workflow(&wf).await.unwrap_err(),
        Error::CyclicGraph { .. }
    ));
}

#[tokio::test]
async fn test_graph_is_frozen_once_running() {
    let harness = Harness::new(1);
    let wf = harness.workflow("frozen").await;
    let a = harness.add(&wf, "a", &[], json!({"delay_ms": 5_000})).await;
    let b = harness.add(&wf, "b", &[], json!({})).await;

    let runner = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow(&wf).await })
    };
    guarded(async {
        while harness.executor.start_order().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await;

    let err = harness
        .orchestrator
        .add_task_to_workflow(&wf, TaskSpec::new("scripted"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = harness.orchestrator.add_dependency(&wf, &b, &a).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    harness.orchestrator.cancel_workflow(&wf).await.unwrap();
    guarded(runner).await.unwrap().unwrap();

    let err = harness
        .orchestrator
        .add_task_to_workflow(&wf, TaskSpec::new("scripted"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_all_tasks_terminal_after_failure() {
    let harness = Harness::new(4);
    let wf = harness.workflow("terminal").await;

    let root = harness.add(&wf, "root", &[], json!({})).await;
    let bad = harness
        .add_spec(&wf, "bad", &[root], json!({"always_fail": true}), |s| {
            s.with_max_retries(1)
        })
        .await;
    let fine = harness.add(&wf, "fine", &[root], json!({"delay_ms": 5})).await;
    harness.add(&wf, "after_bad", &[bad, fine], json!({})).await;
    harness.add(&wf, "after_fine", &[fine], json!({})).await;

    let summary = guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();

    assert_eq!(summary.status, WorkflowStatus::Failed);
    let report = harness.orchestrator.get_workflow_status(&wf).await.unwrap();
    assert!(report.tasks.iter().all(|t| t.status.is_terminal()));
    assert_eq!(report.counts.completed, 3);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(harness.executor.attempts("bad"), 2);
}
