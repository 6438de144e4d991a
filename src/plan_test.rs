//! Tests for plan parsing and execution.

use std::sync::Arc;

use serde_json::json;

use crate::controller::JobController;
use crate::error::JobError;
use crate::plan::{Plan, PlanStep};
use crate::script::ScriptCatalog;
use crate::types::{Checkpoint, JobDescriptor, StartOptions};

const PLAN: &str = r#"{
  "name": "main",
  "scripts": {
    "child": [ { "kind": "group", "key": "c1", "delay_ms": 50, "result": "c" } ]
  },
  "steps": [
    { "kind": "group", "key": "1", "delay_ms": 100, "result": 1 },
    { "kind": "script", "script": "child" },
    { "kind": "group", "key": "2", "steps": [
      { "kind": "group", "key": "2.1", "result": 21 }
    ] }
  ]
}"#;

#[test]
fn parses_tagged_steps() {
  let plan = Plan::from_json(PLAN).unwrap();
  assert_eq!(plan.steps.len(), 3);
  assert_eq!(
    plan.steps[1],
    PlanStep::Script {
      script: "child".to_string()
    }
  );
  let PlanStep::Group { steps, result, .. } = &plan.steps[2] else {
    panic!("expected group");
  };
  assert_eq!(steps.len(), 1);
  assert!(result.is_none());
}

#[test]
fn catalog_hashes_are_stable_per_definition() {
  let plan = Plan::from_json(PLAN).unwrap();
  let a = plan.catalog();
  let b = Plan::from_json(PLAN).unwrap().catalog();
  let main = a.lookup("main").unwrap().code_hash();
  assert_eq!(main, b.lookup("main").unwrap().code_hash());
  assert_ne!(main, a.lookup("child").unwrap().code_hash());
}

#[tokio::test(start_paused = true)]
async fn plan_runs_groups_nested_scripts_and_inner_steps() {
  let plan = Plan::from_json(PLAN).unwrap();
  let c = JobController::new(Arc::new(plan.catalog()));
  let id = c
    .start(JobDescriptor::new("main", "main"), "", StartOptions::default())
    .unwrap();
  c.wait(id).await.unwrap();
  assert_eq!(
    c.finish_and_get_result(id, false).unwrap(),
    json!([1, "c", 21, {"key": "2"}])
  );
}

#[tokio::test(start_paused = true)]
async fn paused_plan_resumes_from_checkpoint() {
  let plan = Plan::from_json(PLAN).unwrap();
  let catalog = Arc::new(plan.catalog());
  let code_hash = catalog.lookup("main").unwrap().code_hash();
  let c = JobController::new(catalog);

  let id = c
    .start(JobDescriptor::new("main", "main"), "", StartOptions::default())
    .unwrap();
  c.pause(id).unwrap();
  c.wait(id).await.unwrap();
  let Err(JobError::PausedEarly { groups }) = c.finish_and_get_result(id, false) else {
    panic!("expected the plan to pause");
  };
  assert_eq!(groups.len(), 1);

  let checkpoint = Checkpoint::from_snapshot(code_hash, &groups);
  let id = c
    .start(
      JobDescriptor::new("main", "main"),
      "",
      StartOptions::resume(checkpoint),
    )
    .unwrap();
  c.wait(id).await.unwrap();
  assert_eq!(
    c.finish_and_get_result(id, false).unwrap(),
    json!([1, "c", 21, {"key": "2"}])
  );
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_group_delay() {
  let plan = Plan::from_json(
    r#"{"name": "slow", "steps": [ { "kind": "group", "key": "1", "delay_ms": 60000 } ]}"#,
  )
  .unwrap();
  let c = JobController::new(Arc::new(plan.catalog()));
  let id = c
    .start(JobDescriptor::new("slow", "slow"), "", StartOptions::default())
    .unwrap();
  tokio::time::sleep(std::time::Duration::from_millis(10)).await;
  c.cancel(id).unwrap();
  c.wait(id).await.unwrap();
  assert_eq!(c.finish_and_get_result(id, false), Err(JobError::Cancelled));
}
