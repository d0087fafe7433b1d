//! Workflow cancellation tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use siteflow::core::{TaskStatus, WorkflowId, WorkflowStatus};
use siteflow::orchestration::OrchestratorEvent;
use siteflow::Error;

use crate::fixtures::{guarded, Harness};

/// Wait until `count` tool calls have actually started.
async fn wait_for_started(harness: &Harness, count: usize) {
    guarded(async {
        while harness.executor.start_order().len() < count {
            tokio::task::yield_now().await;
        }
    })
    .await;
}

/// Test: cancel while tasks are in flight
/// Given two long tasks running under cap 2 and two tasks still pending
/// When the workflow is cancelled
/// Then execution returns a cancelled summary and pending tools never run
#[tokio::test]
async fn test_cancel_mid_run() {
    let mut harness = Harness::new(2);
    let wf = harness.workflow("cancel").await;

    let a = harness.add(&wf, "a", &[], json!({"delay_ms": 5_000})).await;
    harness.add(&wf, "b", &[], json!({"delay_ms": 5_000})).await;
    harness.add(&wf, "c", &[a], json!({})).await;
    harness.add(&wf, "d", &[], json!({})).await;

    let runner = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow(&wf).await })
    };
    wait_for_started(&harness, 2).await;

    let cancelled = harness.orchestrator.cancel_workflow(&wf).await.unwrap();
    assert_eq!(cancelled, 4);

    let summary = guarded(runner).await.unwrap().unwrap();
    assert_eq!(summary.status, WorkflowStatus::Cancelled);
    assert_eq!(summary.tasks_cancelled, 4);
    assert_eq!(summary.tasks_completed, 0);
    assert!(summary.execution_time < 5.0);

    let exec = &harness.executor;
    let mut started = exec.start_order();
    started.sort();
    assert_eq!(started, vec!["a", "b"]);
    assert!(exec.position("end:a").is_none());
    assert!(exec.position("end:b").is_none());

    let report = harness.orchestrator.get_workflow_status(&wf).await.unwrap();
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
    assert_eq!(harness.orchestrator.get_statistics().await.active_tasks, 0);

    let finished: Vec<_> = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, OrchestratorEvent::WorkflowFinished { .. }))
        .collect();
    assert_eq!(finished.len(), 1);
    assert!(matches!(
        finished[0],
        OrchestratorEvent::WorkflowFinished {
            status: WorkflowStatus::Cancelled,
            ..
        }
    ));
}

/// Test: cancel a task whose tool ignores its cancellation token
/// Given a running task that never answers and never checks cancellation
/// When the workflow is cancelled
/// Then execution still returns a cancelled summary and frees its slot
#[tokio::test]
async fn test_cancel_unresponsive_tool() {
    let harness = Harness::new(1);
    let wf = harness.workflow("unresponsive").await;
    let stuck = harness.add(&wf, "stuck", &[], json!({"hang": true})).await;
    harness.add(&wf, "after", &[stuck], json!({})).await;

    let runner = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow(&wf).await })
    };
    wait_for_started(&harness, 1).await;

    assert_eq!(harness.orchestrator.cancel_workflow(&wf).await.unwrap(), 2);

    let summary = guarded(runner).await.unwrap().unwrap();
    assert_eq!(summary.status, WorkflowStatus::Cancelled);
    assert_eq!(summary.tasks_cancelled, 2);
    assert_eq!(harness.orchestrator.get_statistics().await.active_tasks, 0);
    assert_eq!(harness.executor.start_order(), vec!["stuck"]);
    assert!(harness.executor.position("end:stuck").is_none());
}

/// Test: abandoning an execution mid-run
/// Given a workflow whose only running task never answers
/// When the caller stops awaiting `execute_workflow`
/// Then the workflow ends Cancelled, no slot leaks and it can be removed
#[tokio::test]
async fn test_abandoned_execution_can_be_removed() {
    let mut harness = Harness::new(2);
    let wf = harness.workflow("abandoned").await;
    let stuck = harness.add(&wf, "stuck", &[], json!({"hang": true})).await;
    harness.add(&wf, "after", &[stuck], json!({})).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        harness.orchestrator.execute_workflow(&wf),
    )
    .await;
    assert!(outcome.is_err());

    assert_eq!(harness.orchestrator.get_statistics().await.active_tasks, 0);
    let report = harness.orchestrator.get_workflow_status(&wf).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Cancelled);
    assert_eq!(report.counts.running, 0);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));

    let err = harness.orchestrator.cancel_workflow(&wf).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    harness.orchestrator.remove_workflow(&wf).await.unwrap();
    assert!(harness.orchestrator.list_workflows().await.is_empty());

    let finished = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, OrchestratorEvent::WorkflowFinished { .. }))
        .count();
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn test_cancel_finished_workflow_rejected() {
    let harness = Harness::new(1);
    let wf = harness.workflow("done").await;
    harness.add(&wf, "a", &[], json!({})).await;
    guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();

    let err = harness.orchestrator.cancel_workflow(&wf).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_cancel_twice_rejected() {
    let harness = Harness::new(1);
    let wf = harness.workflow("twice").await;
    harness.add(&wf, "a", &[], json!({"delay_ms": 5_000})).await;

    let runner = {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow(&wf).await })
    };
    wait_for_started(&harness, 1).await;

    harness.orchestrator.cancel_workflow(&wf).await.unwrap();
    let err = harness.orchestrator.cancel_workflow(&wf).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let summary = guarded(runner).await.unwrap().unwrap();
    assert_eq!(summary.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_unknown_workflow() {
    let harness = Harness::new(1);
    let err = harness
        .orchestrator
        .cancel_workflow(&WorkflowId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_cancelled_workflow_cannot_run() {
    let harness = Harness::new(1);
    let wf = harness.workflow("never").await;
    harness.add(&wf, "a", &[], json!({})).await;

    harness.orchestrator.cancel_workflow(&wf).await.unwrap();
    let err = harness.orchestrator.execute_workflow(&wf).await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(harness.executor.log().is_empty());
}
