//! Meta-tool registry tests against a real orchestrator.

use std::sync::Arc;

use serde_json::{json, Value};

use siteflow::core::{Params, WorkflowStatus};
use siteflow::meta::{MetaToolContext, MetaToolDescriptor, MetaToolRegistry, ResponseStatus};
use siteflow::orchestration::{PlanStep, WorkflowPlan};
use siteflow::{Error, Result};

use crate::fixtures::{guarded, Harness};

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

fn scripted(label: &str, extra: Value) -> PlanStep {
    let mut step_params = params(extra);
    step_params.insert("key".to_string(), json!(label));
    PlanStep::new(label, "scripted").with_params(step_params)
}

/// Gathers quantities and rates in parallel, then prices them.
async fn budget_estimate(ctx: MetaToolContext, params: Params) -> Result<Value> {
    let project = params
        .get("project")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("project must be a string".to_string()))?;

    let gather = WorkflowPlan::new("gather", project)
        .step(scripted("quantities", json!({"delay_ms": 5})))
        .step(scripted("rates", json!({"delay_ms": 5})));
    let price = WorkflowPlan::new("price", project).step(
        scripted("price", json!({"always_fail": params.contains_key("break_pricing")}))
            .with_max_retries(0),
    );

    let outcomes = ctx.run_phases(&[gather, price]).await?;
    let last = outcomes
        .into_iter()
        .last()
        .ok_or_else(|| Error::Execution("no phases ran".to_string()))?
        .require()?;
    Ok(json!({ "project": project, "price": last.result("price") }))
}

async fn document_search(_ctx: MetaToolContext, params: Params) -> Result<Value> {
    Ok(json!({ "query": params.get("query") }))
}

fn registry(harness: &Harness) -> MetaToolRegistry {
    let mut registry = MetaToolRegistry::new(Arc::clone(&harness.orchestrator));
    registry
        .register(
            MetaToolDescriptor::new("budget_estimate", "Estimate project cost", "cost")
                .requires(["project"])
                .optional(["break_pricing"])
                .tags(["budget", "estimate"]),
            budget_estimate,
        )
        .unwrap();
    registry
        .register(
            MetaToolDescriptor::new("document_search", "Find drawings and specs", "documents")
                .requires(["query"])
                .tags(["search", "documents"]),
            document_search,
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn test_search_by_tag() {
    let harness = Harness::new(2);
    let registry = registry(&harness);

    let hits = registry.search("budget", None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "budget_estimate");
    assert_eq!(hits[0].category, "cost");

    assert!(registry.search("budget", Some("documents")).is_empty());
    assert_eq!(registry.search("DOCUMENTS", None)[0].name, "document_search");
}

#[tokio::test]
async fn test_missing_required_param_is_error_response() {
    let harness = Harness::new(2);
    let registry = registry(&harness);

    let response = registry.execute("budget_estimate", Params::new()).await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.error.unwrap().contains("project"));
    assert_eq!(response.tasks_completed, 0);
    assert!(harness.orchestrator.list_workflows().await.is_empty());
}

#[tokio::test]
async fn test_unknown_meta_tool_is_error_response() {
    let harness = Harness::new(1);
    let response = registry(&harness).execute("nope", Params::new()).await;

    assert!(!response.is_success());
    assert!(response.result.is_none());
}

#[tokio::test]
async fn test_multi_phase_recipe_succeeds() {
    let harness = Harness::new(2);
    let registry = registry(&harness);

    let response = guarded(registry.execute("budget_estimate", params(json!({"project": "north wing"}))))
        .await;

    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(response.tasks_completed, 3);
    assert_eq!(
        response.result.unwrap(),
        json!({"project": "north wing", "price": {"key": "price", "attempt": 1}})
    );
    assert_eq!(harness.executor.max_in_flight(), 2);
}

/// Test: partial progress survives a failed phase
/// Given a recipe whose second phase fails
/// When the meta-tool runs
/// Then the response is an error that still counts the first phase's tasks
#[tokio::test]
async fn test_multi_phase_recipe_reports_partial_progress() {
    let harness = Harness::new(2);
    let registry = registry(&harness);

    let response = guarded(registry.execute(
        "budget_estimate",
        params(json!({"project": "north wing", "break_pricing": true})),
    ))
    .await;

    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.tasks_completed, 2);
    let error = response.error.unwrap();
    assert!(error.contains("Task price failed after 1 attempt(s)"), "{}", error);

    let workflows = harness.orchestrator.list_workflows().await;
    assert_eq!(workflows.len(), 2);
    assert_eq!(workflows[0].status, WorkflowStatus::Completed);
    assert_eq!(workflows[1].status, WorkflowStatus::Failed);
}
