//! Concurrency cap and dispatch order tests.

use serde_json::json;

use siteflow::core::{TaskPriority, WorkflowStatus};

use crate::fixtures::{guarded, Harness};

async fn run_wide(cap: usize, width: usize) -> Harness {
    let harness = Harness::new(cap);
    let wf = harness.workflow("wide").await;
    for i in 0..width {
        harness
            .add(&wf, &format!("t{}", i), &[], json!({"delay_ms": 15}))
            .await;
    }
    let summary = guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();
    assert_eq!(summary.status, WorkflowStatus::Completed);
    assert_eq!(summary.tasks_completed, width);
    harness
}

#[tokio::test]
async fn test_cap_one_runs_serially() {
    let harness = run_wide(1, 4).await;
    assert_eq!(harness.executor.max_in_flight(), 1);

    // Every task ends before the next one starts.
    let log = harness.executor.log();
    for pair in log.chunks(2) {
        let key = pair[0].strip_prefix("start:").unwrap();
        assert_eq!(pair[1], format!("end:{}", key));
    }
}

#[tokio::test]
async fn test_cap_limits_parallelism() {
    let harness = run_wide(3, 8).await;
    assert_eq!(harness.executor.max_in_flight(), 3);
}

#[tokio::test]
async fn test_cap_larger_than_graph() {
    let harness = run_wide(10, 6).await;
    assert_eq!(harness.executor.max_in_flight(), 6);
}

/// Test: layered graph never exceeds the cap
/// Given root -> 5 middle tasks -> sink, with cap 2
/// When the workflow executes
/// Then at most two calls overlap and the sink runs last
#[tokio::test]
async fn test_cap_respected_across_layers() {
    let harness = Harness::new(2);
    let wf = harness.workflow("layers").await;

    let root = harness.add(&wf, "root", &[], json!({"delay_ms": 5})).await;
    let mut middle = Vec::new();
    for i in 0..5 {
        middle.push(
            harness
                .add(&wf, &format!("m{}", i), &[root], json!({"delay_ms": 10}))
                .await,
        );
    }
    harness.add(&wf, "sink", &middle, json!({})).await;

    let summary = guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(harness.executor.max_in_flight(), 2);
    let order = harness.executor.start_order();
    assert_eq!(order.first().map(String::as_str), Some("root"));
    assert_eq!(order.last().map(String::as_str), Some("sink"));
    for i in 0..5 {
        assert!(
            harness.executor.position(&format!("end:m{}", i)).unwrap()
                < harness.executor.position("start:sink").unwrap()
        );
    }
}

#[tokio::test]
async fn test_priority_decides_dispatch_order() {
    let harness = Harness::new(1);
    let wf = harness.workflow("priority").await;

    harness
        .add_spec(&wf, "low", &[], json!({}), |s| s.with_priority(TaskPriority::Low))
        .await;
    harness.add(&wf, "normal", &[], json!({})).await;
    harness
        .add_spec(&wf, "critical", &[], json!({}), |s| {
            s.with_priority(TaskPriority::Critical)
        })
        .await;
    harness
        .add_spec(&wf, "high", &[], json!({}), |s| s.with_priority(TaskPriority::High))
        .await;

    guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();

    assert_eq!(
        harness.executor.start_order(),
        vec!["critical", "high", "normal", "low"]
    );
}

#[tokio::test]
async fn test_equal_priority_keeps_insertion_order() {
    let harness = Harness::new(1);
    let wf = harness.workflow("fifo").await;
    for key in ["first", "second", "third", "fourth"] {
        harness.add(&wf, key, &[], json!({})).await;
    }

    guarded(harness.orchestrator.execute_workflow(&wf)).await.unwrap();

    assert_eq!(
        harness.executor.start_order(),
        vec!["first", "second", "third", "fourth"]
    );
}

#[tokio::test]
async fn test_active_tasks_back_to_zero() {
    let harness = run_wide(2, 5).await;
    let stats = harness.orchestrator.get_statistics().await;
    assert_eq!(stats.active_tasks, 0);
    assert_eq!(stats.tasks_executed, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cap_applies_per_workflow() {
    let harness = Harness::new(2);
    let first = harness.workflow("first").await;
    let second = harness.workflow("second").await;
    for i in 0..3 {
        harness
            .add(&first, &format!("a{}", i), &[], json!({"delay_ms": 30}))
            .await;
        harness
            .add(&second, &format!("b{}", i), &[], json!({"delay_ms": 30}))
            .await;
    }

    let (one, two) = guarded(async {
        tokio::join!(
            harness.orchestrator.execute_workflow(&first),
            harness.orchestrator.execute_workflow(&second)
        )
    })
    .await;

    assert!(one.unwrap().is_success());
    assert!(two.unwrap().is_success());
    assert!(harness.executor.max_in_flight() <= 4);
    assert_eq!(harness.orchestrator.get_statistics().await.active_tasks, 0);
}
