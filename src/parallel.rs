//! Cooperative parallel composition of nested jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::error::JobError;
use crate::site::ExecutionSite;
use crate::types::{EarlyStop, JobDescriptor, NestedOptions};

async fn join(task: JoinHandle<Result<Value, JobError>>) -> Result<Value, JobError> {
  task
    .await
    .map_err(|e| JobError::ScriptFailure(format!("parallel job task failed: {e}")))?
}

/// Starts every descriptor as a nested job of `site` and waits for all of them.
///
/// With `leading` set, the composer first waits for that job alone, then flips the flag
/// every sibling's early-stop predicate reads. Siblings are never aborted; results come
/// back in start order once all have finished. The first failure in start order wins.
#[instrument(
  level = "trace",
  skip(site, descriptors),
  fields(job_id = %site.job().id, jobs = descriptors.len())
)]
pub(crate) async fn run_parallel(
  site: &ExecutionSite,
  descriptors: Vec<JobDescriptor>,
  leading: Option<usize>,
) -> Result<Vec<Value>, JobError> {
  site.check_cancelled()?;
  let leading = leading.filter(|&idx| idx < descriptors.len());
  let stop = Arc::new(AtomicBool::new(false));

  // Every lookup must succeed before any nested ledger is attached.
  let resolved = descriptors
    .into_iter()
    .map(|descriptor| {
      let script = site.engine().resolve(&descriptor)?;
      Ok((descriptor, script))
    })
    .collect::<Result<Vec<_>, JobError>>()?;

  // Attach in order so nested ledgers land in the parent's tree in start order.
  let mut prepared = Vec::with_capacity(resolved.len());
  for (descriptor, script) in resolved {
    let flag = stop.clone();
    let early_stop: EarlyStop = Arc::new(move || flag.load(Ordering::SeqCst));
    let options = NestedOptions {
      early_stop: Some(early_stop),
    };
    prepared.push((site.engine().attach_nested(site, descriptor, options), script));
  }

  let mut tasks: Vec<Option<JoinHandle<Result<Value, JobError>>>> = prepared
    .into_iter()
    .map(|(child, script)| {
      Some(tokio::spawn(
        site.engine().clone().execute_nested(child, script),
      ))
    })
    .collect();

  let mut results: Vec<Option<Result<Value, JobError>>> = tasks.iter().map(|_| None).collect();
  if let Some((idx, task)) = leading.and_then(|idx| Some((idx, tasks[idx].take()?))) {
    results[idx] = Some(join(task).await);
    debug!(leading = idx, "leading job finished, signalling siblings");
    stop.store(true, Ordering::SeqCst);
  }
  for (idx, task) in tasks.iter_mut().enumerate() {
    if let Some(task) = task.take() {
      results[idx] = Some(join(task).await);
    }
  }

  results
    .into_iter()
    .map(|r| r.unwrap_or(Ok(Value::Null)))
    .collect()
}
