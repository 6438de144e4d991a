//! Execution site: the handle a running script (root or nested) uses to reach the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::controller::Engine;
use crate::error::JobError;
use crate::ledger::{GroupStart, SharedLedger};
use crate::parallel;
use crate::script::ServiceContext;
use crate::types::{JobDescriptor, JobHandle, NestedOptions};

/// One running job as seen by the script it hosts.
///
/// Cheap to clone. Every site shares the root job's cancellation token and pause flag;
/// each owns its own ledger (nested ledgers are registered in the parent's tree) and its
/// own progress slot.
#[derive(Clone)]
pub struct ExecutionSite {
  inner: Arc<SiteInner>,
}

struct SiteInner {
  engine: Arc<Engine>,
  job: Arc<JobHandle>,
  root: Arc<JobHandle>,
  ledger: SharedLedger,
  cancel: CancellationToken,
  pause: Arc<AtomicBool>,
}

impl ExecutionSite {
  pub(crate) fn root(
    engine: Arc<Engine>,
    job: Arc<JobHandle>,
    ledger: SharedLedger,
    cancel: CancellationToken,
    pause: Arc<AtomicBool>,
  ) -> Self {
    Self {
      inner: Arc::new(SiteInner {
        engine,
        root: job.clone(),
        job,
        ledger,
        cancel,
        pause,
      }),
    }
  }

  /// Site for a nested job started from `self`.
  pub(crate) fn child(&self, job: Arc<JobHandle>, ledger: SharedLedger) -> Self {
    Self {
      inner: Arc::new(SiteInner {
        engine: self.inner.engine.clone(),
        job,
        root: self.inner.root.clone(),
        ledger,
        cancel: self.inner.cancel.clone(),
        pause: self.inner.pause.clone(),
      }),
    }
  }

  pub(crate) fn engine(&self) -> &Arc<Engine> {
    &self.inner.engine
  }

  /// The job this site runs.
  pub fn job(&self) -> &JobHandle {
    &self.inner.job
  }

  /// The root job of the tree this site belongs to.
  pub fn root_job(&self) -> &JobHandle {
    &self.inner.root
  }

  pub fn depth(&self) -> usize {
    self.inner.job.depth
  }

  pub fn descriptor(&self) -> &JobDescriptor {
    &self.inner.job.descriptor
  }

  /// Preset input value from the job descriptor.
  pub fn input(&self, key: &str) -> Option<&Value> {
    self.inner.job.descriptor.input(key)
  }

  pub fn services(&self) -> &ServiceContext {
    self.inner.engine.services()
  }

  pub fn ledger(&self) -> &SharedLedger {
    &self.inner.ledger
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.inner.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.cancel.is_cancelled()
  }

  /// Cooperative cancellation point; call between blocks.
  pub fn check_cancelled(&self) -> Result<(), JobError> {
    if self.is_cancelled() {
      Err(JobError::Cancelled)
    } else {
      Ok(())
    }
  }

  /// Early-stop predicate of this job (set by a parallel composer).
  pub fn should_stop_early(&self) -> bool {
    self.inner.job.should_stop_early()
  }

  /// Begins execution group `key`. On [GroupStart::Skip] the body must not run.
  pub fn begin_group(&self, key: &str, name: Option<&str>) -> Result<GroupStart, JobError> {
    self.begin_group_with_details(key, name, None)
  }

  pub fn begin_group_with_details(
    &self,
    key: &str,
    name: Option<&str>,
    details: Option<Value>,
  ) -> Result<GroupStart, JobError> {
    self.check_cancelled()?;
    Ok(self.inner.ledger.lock().start_with_details(key, name, details))
  }

  /// Ends the innermost open group with `result`, then honors a pending pause request by
  /// unwinding with [JobError::PausedEarly].
  #[instrument(level = "trace", skip(self, result), fields(job_id = %self.job().id))]
  pub fn end_group(&self, result: Value) -> Result<(), JobError> {
    let mut ledger = self.inner.ledger.lock();
    ledger.finish(result)?;
    if self.inner.pause.load(Ordering::SeqCst) {
      info!(
        job_id = %self.job().id,
        depth = self.depth(),
        "pause requested, unwinding at group boundary"
      );
      return Err(JobError::PausedEarly {
        groups: ledger.serialize(true),
      });
    }
    Ok(())
  }

  /// Runs a nested job to completion and deserializes its result into `T`.
  pub async fn run<T: DeserializeOwned>(
    &self,
    descriptor: JobDescriptor,
    options: NestedOptions,
  ) -> Result<T, JobError> {
    let value = self.run_value(descriptor, options).await?;
    serde_json::from_value(value).map_err(|e| JobError::ResultType(e.to_string()))
  }

  /// Runs a nested job to completion and returns its raw result.
  pub async fn run_value(
    &self,
    descriptor: JobDescriptor,
    options: NestedOptions,
  ) -> Result<Value, JobError> {
    let (child, script) = self.engine().prepare_nested(self, descriptor, options)?;
    self.engine().clone().execute_nested(child, script).await
  }

  /// Runs nested jobs concurrently; see [parallel::run_parallel].
  pub async fn run_parallel(
    &self,
    descriptors: Vec<JobDescriptor>,
    leading: Option<usize>,
  ) -> Result<Vec<Value>, JobError> {
    parallel::run_parallel(self, descriptors, leading).await
  }

  /// Asks the user for a value and waits for the response, cancellation, or `timeout`
  /// (falls back to the configured default).
  pub async fn request_input(
    &self,
    key: &str,
    value_type: Option<&str>,
    timeout: Option<Duration>,
  ) -> Result<Value, JobError> {
    self
      .engine()
      .request_input(self, key, value_type, timeout)
      .await
  }

  /// Replaces this depth's progress sample and publishes the aggregate.
  pub fn report_progress(&self, info: Value, ratio: f64, name: Option<&str>) {
    self.engine().report_progress(self, info, ratio, name);
  }
}

impl std::fmt::Debug for ExecutionSite {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionSite")
      .field("job", &self.inner.job)
      .field("root", &self.inner.root.id)
      .finish()
  }
}
