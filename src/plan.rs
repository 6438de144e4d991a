//! Declarative plans: a JSON description of sequential, nested, and parallel groups that
//! runs through the host without an interpreter. Used by the `run_script` binary.
//!
//! ```json
//! {
//!   "name": "main",
//!   "scripts": { "child": [ { "kind": "group", "key": "c1", "delay_ms": 50 } ] },
//!   "steps": [
//!     { "kind": "group", "key": "1", "delay_ms": 100, "result": 1 },
//!     { "kind": "script", "script": "child" },
//!     { "kind": "parallel", "scripts": ["child", "child"], "leading": 0 }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::JobError;
use crate::ledger::GroupStart;
use crate::script::{InMemoryCatalog, Script};
use crate::site::ExecutionSite;
use crate::types::{JobDescriptor, NestedOptions};

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
  /// Execution group that waits `delay_ms`, runs its inner steps, and records `result`
  /// (defaults to `{"key": key}`).
  Group {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    steps: Vec<PlanStep>,
  },
  /// Nested run of a script declared in [Plan::scripts].
  Script { script: String },
  /// Concurrent nested runs, optionally with a leading job.
  Parallel {
    scripts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    leading: Option<usize>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  /// Name the root steps are registered under.
  pub name: String,
  #[serde(default)]
  pub scripts: BTreeMap<String, Vec<PlanStep>>,
  pub steps: Vec<PlanStep>,
}

impl Plan {
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Catalog with the root steps under [Plan::name] and every declared script.
  pub fn catalog(&self) -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.register(&self.name, PlanScript::new(self.steps.clone()));
    for (name, steps) in &self.scripts {
      catalog.register(name, PlanScript::new(steps.clone()));
    }
    catalog
  }
}

/// [Script] that executes a list of plan steps.
pub struct PlanScript {
  steps: Arc<Vec<PlanStep>>,
  code_hash: String,
}

impl PlanScript {
  pub fn new(steps: Vec<PlanStep>) -> Self {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(&steps)
      .unwrap_or_default()
      .hash(&mut hasher);
    Self {
      steps: Arc::new(steps),
      code_hash: format!("{:016x}", hasher.finish()),
    }
  }
}

#[async_trait]
impl Script for PlanScript {
  fn code_hash(&self) -> String {
    self.code_hash.clone()
  }

  async fn run(&self, site: ExecutionSite) -> Result<Option<Value>, JobError> {
    run_steps(site, self.steps.clone()).await?;
    Ok(None)
  }
}

fn run_steps(
  site: ExecutionSite,
  steps: Arc<Vec<PlanStep>>,
) -> BoxFuture<'static, Result<(), JobError>> {
  async move {
    let total = steps.len();
    for (idx, step) in steps.iter().enumerate() {
      run_step(&site, step).await?;
      site.report_progress(
        json!({"step": idx + 1, "of": total}),
        (idx + 1) as f64 / total as f64,
        Some(site.descriptor().name.as_str()),
      );
    }
    Ok(())
  }
  .boxed()
}

async fn run_step(site: &ExecutionSite, step: &PlanStep) -> Result<(), JobError> {
  match step {
    PlanStep::Group {
      key,
      name,
      delay_ms,
      result,
      steps,
    } => {
      if let GroupStart::Skip { .. } = site.begin_group(key, name.as_deref())? {
        debug!(key = %key, "group already resolved");
        return Ok(());
      }
      if *delay_ms > 0 {
        tokio::select! {
          _ = tokio::time::sleep(Duration::from_millis(*delay_ms)) => {}
          _ = site.cancellation().cancelled() => return Err(JobError::Cancelled),
        }
      }
      if !steps.is_empty() {
        run_steps(site.clone(), Arc::new(steps.clone())).await?;
      }
      site.end_group(result.clone().unwrap_or_else(|| json!({ "key": key })))
    }
    PlanStep::Script { script } => {
      site
        .run_value(JobDescriptor::new(script, script), NestedOptions::default())
        .await?;
      Ok(())
    }
    PlanStep::Parallel { scripts, leading } => {
      let descriptors = scripts
        .iter()
        .map(|s| JobDescriptor::new(s, s))
        .collect();
      site.run_parallel(descriptors, *leading).await?;
      Ok(())
    }
  }
}
