//! Job controller: admits exactly one root job at a time and hosts its nested tree.
//!
//! - [JobController::start] allocates the root handle, cancellation token, pause flag and
//!   ledger, then runs the script on its own task.
//! - [JobController::cancel] and [JobController::pause] raise cooperative signals.
//! - [JobController::finish_and_get_result] hands out the retained outcome and, unless
//!   kept open, retires the slot so a new job can start.
//!
//! All mutable state (active slot, progress table, pending input) sits behind one mutex
//! per controller. Ledgers have their own locks and are never locked before the state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::JobError;
use crate::input_broker::{InputBroker, InputReply};
use crate::ledger::{Ledger, SharedLedger};
use crate::notify::EventBus;
use crate::progress::ProgressAggregator;
use crate::script::{Script, ScriptCatalog, ServiceContext};
use crate::site::ExecutionSite;
use crate::types::{
  ActiveJobInfo, CurrentSnapshot, GroupNode, InputRequest, JobDescriptor, JobEvent, JobHandle,
  JobId, JobState, NestedOptions, ProgressSample, StartOptions,
};

/// The job occupying the root slot, from start until retirement.
struct ActiveJob {
  handle: Arc<JobHandle>,
  user_token: String,
  started_at: DateTime<Utc>,
  code_hash: String,
  cancel: CancellationToken,
  pause: Arc<AtomicBool>,
  ledger: SharedLedger,
  state: JobState,
  outcome: Option<Result<Value, JobError>>,
  completion: watch::Receiver<bool>,
}

impl ActiveJob {
  fn info(&self) -> ActiveJobInfo {
    ActiveJobInfo {
      job_id: self.handle.id,
      name: self.handle.descriptor.name.clone(),
      script: self.handle.descriptor.script.clone(),
      user_token: self.user_token.clone(),
      state: self.state,
      started_at: self.started_at,
    }
  }
}

#[derive(Default)]
struct ControllerState {
  active: Option<ActiveJob>,
  progress: ProgressAggregator,
  input: InputBroker,
  /// Ids of the root job and every nested job still running.
  live: HashSet<JobId>,
}

impl ControllerState {
  /// True while `root_id` occupies the slot.
  fn is_current(&self, root_id: JobId) -> bool {
    self.active.as_ref().is_some_and(|a| a.handle.id == root_id)
  }

  fn active_for(&self, job_id: JobId) -> Result<&ActiveJob, JobError> {
    self
      .active
      .as_ref()
      .filter(|a| a.handle.id == job_id)
      .ok_or(JobError::NotActive(job_id))
  }
}

/// State and collaborators shared by the controller and every execution site.
pub(crate) struct Engine {
  config: EngineConfig,
  catalog: Arc<dyn ScriptCatalog>,
  services: ServiceContext,
  events: EventBus,
  state: Mutex<ControllerState>,
}

/// Runs `script` on its own task so a panic surfaces as a script failure.
async fn run_script(
  script: Arc<dyn Script>,
  site: ExecutionSite,
) -> Result<Option<Value>, JobError> {
  tokio::spawn(async move { script.run(site).await })
    .await
    .map_err(|e| JobError::ScriptFailure(format!("job task failed: {e}")))?
}

/// Explicit result, else the flattened group results, else null.
fn job_result(explicit: Option<Value>, ledger: &SharedLedger) -> Value {
  explicit
    .or_else(|| ledger.lock().create_flat_results().map(Value::Array))
    .unwrap_or(Value::Null)
}

impl Engine {
  pub(crate) fn services(&self) -> &ServiceContext {
    &self.services
  }

  /// Resolves a script reference without touching any ledger.
  pub(crate) fn resolve(&self, descriptor: &JobDescriptor) -> Result<Arc<dyn Script>, JobError> {
    self
      .catalog
      .lookup(&descriptor.script)
      .ok_or_else(|| JobError::UnknownScript(descriptor.script.clone()))
  }

  /// Registers the nested ledger at the parent's current position and builds the child site.
  pub(crate) fn attach_nested(
    &self,
    parent: &ExecutionSite,
    descriptor: JobDescriptor,
    options: NestedOptions,
  ) -> ExecutionSite {
    let ledger = parent
      .ledger()
      .lock()
      .create_nested(&descriptor.script, Some(descriptor.name.as_str()));
    let handle = parent
      .job()
      .nested(descriptor)
      .with_early_stop(options.early_stop);
    parent.child(Arc::new(handle), ledger)
  }

  /// Resolves the script, then attaches the nested job to the parent.
  pub(crate) fn prepare_nested(
    &self,
    parent: &ExecutionSite,
    descriptor: JobDescriptor,
    options: NestedOptions,
  ) -> Result<(ExecutionSite, Arc<dyn Script>), JobError> {
    parent.check_cancelled()?;
    let script = self.resolve(&descriptor)?;
    Ok((self.attach_nested(parent, descriptor, options), script))
  }

  /// Runs a prepared nested job to completion, tracking it while it is live.
  ///
  /// Progress slots are only touched while the job's root still occupies the slot, so a
  /// nested task that outlives its root cannot disturb the next root's table.
  #[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %site.job().id, depth = site.depth())
  )]
  pub(crate) async fn execute_nested(
    self: Arc<Self>,
    site: ExecutionSite,
    script: Arc<dyn Script>,
  ) -> Result<Value, JobError> {
    let job = site.job().clone();
    let root_id = site.root_job().id;
    {
      let mut state = self.state.lock();
      if state.is_current(root_id) {
        state.live.insert(job.id);
        state.progress.track(job.depth);
      }
    }
    debug!(
      job_id = %job.id,
      depth = job.depth,
      script = %job.descriptor.script,
      "nested job started"
    );
    let result = run_script(script, site.clone()).await;
    {
      let mut state = self.state.lock();
      if state.is_current(root_id) {
        state.live.remove(&job.id);
        state.progress.release(job.depth);
        state.input.withdraw(job.id);
      } else {
        debug!(job_id = %job.id, %root_id, "nested job outlived its root");
      }
    }
    debug!(job_id = %job.id, ok = result.is_ok(), "nested job finished");
    Ok(job_result(result?, site.ledger()))
  }

  #[instrument(level = "trace", skip(self, site), fields(job_id = %site.job().id))]
  pub(crate) async fn request_input(
    &self,
    site: &ExecutionSite,
    key: &str,
    value_type: Option<&str>,
    timeout: Option<Duration>,
  ) -> Result<Value, JobError> {
    let job_id = site.job().id;
    let request = InputRequest {
      job_id,
      key: key.to_string(),
      value_type: value_type.map(str::to_string),
      auto_close_delay_ms: self.config.input_auto_close_ms,
    };
    let reply = {
      let mut state = self.state.lock();
      if !state.live.contains(&job_id) {
        return Err(JobError::NotActive(job_id));
      }
      let reply = state.input.open(request.clone())?;
      self.events.publish(JobEvent::InputRequest(request));
      reply
    };

    let cancel = site.cancellation().clone();
    let wait = async move {
      tokio::select! {
        reply = reply => match reply {
          Ok(InputReply::Value(value)) => Ok(value),
          Ok(InputReply::Cancelled) | Err(_) => Err(JobError::Cancelled),
        },
        _ = cancel.cancelled() => Err(JobError::Cancelled),
      }
    };
    let result = match timeout.or(self.config.input_timeout()) {
      Some(limit) => tokio::time::timeout(limit, wait)
        .await
        .unwrap_or_else(|_| {
          Err(JobError::InputTimeout {
            key: key.to_string(),
          })
        }),
      None => wait.await,
    };
    if result.is_err() {
      self.state.lock().input.withdraw(job_id);
    }
    result
  }

  pub(crate) fn report_progress(
    &self,
    site: &ExecutionSite,
    info: Value,
    ratio: f64,
    name: Option<&str>,
  ) {
    let sample = ProgressSample::new(site.depth(), info, ratio, name.map(str::to_string));
    let (root_id, samples, ledger) = {
      let mut guard = self.state.lock();
      let state = &mut *guard;
      let Some(active) = state
        .active
        .as_ref()
        .filter(|a| a.handle.id == site.root_job().id)
      else {
        debug!(job_id = %site.job().id, "dropping progress of a retired job");
        return;
      };
      state.progress.report(sample);
      (
        active.handle.id,
        state.progress.snapshot(),
        active.ledger.clone(),
      )
    };
    let groups = self
      .config
      .progress_includes_groups
      .then(|| ledger.lock().serialize(false));
    self.events.publish(JobEvent::Progress {
      job_id: root_id,
      samples,
      groups,
    });
  }

  /// Records the root job's outcome and publishes `Done` or `Error`.
  fn complete(&self, job_id: JobId, result: Result<Option<Value>, JobError>) {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    let Some(active) = state.active.as_mut().filter(|a| a.handle.id == job_id) else {
      warn!(%job_id, "completed job no longer occupies the slot");
      return;
    };
    state.live.clear();
    state.input.abort_all();

    let event = match result {
      Ok(explicit) => {
        active.state = JobState::Done;
        active.outcome = Some(Ok(job_result(explicit, &active.ledger)));
        info!(%job_id, "job done");
        JobEvent::Done { job_id }
      }
      Err(err) => {
        // Stragglers (e.g. parallel siblings) observe this and wind down.
        active.cancel.cancel();
        let paused = err.is_paused();
        let groups = active.ledger.lock().serialize(true);
        let err = if paused {
          JobError::PausedEarly {
            groups: groups.clone(),
          }
        } else {
          err
        };
        active.state = if paused {
          JobState::Paused
        } else if err.is_cancelled() {
          JobState::Cancelled
        } else {
          JobState::Failed
        };
        info!(%job_id, state = %active.state, error = %err, "job ended early");
        let message = err.to_string();
        active.outcome = Some(Err(err));
        JobEvent::Error {
          job_id,
          message,
          paused,
          code_hash: paused.then(|| active.code_hash.clone()),
          groups,
        }
      }
    };
    self.events.publish(event);
  }
}

/// Outermost object of the host. Cheap to clone; clones share the same slot.
#[derive(Clone)]
pub struct JobController {
  engine: Arc<Engine>,
}

impl JobController {
  pub fn new(catalog: Arc<dyn ScriptCatalog>) -> Self {
    Self::with_config(catalog, EngineConfig::default(), ServiceContext::default())
  }

  pub fn with_config(
    catalog: Arc<dyn ScriptCatalog>,
    config: EngineConfig,
    services: ServiceContext,
  ) -> Self {
    let events = EventBus::new(config.event_capacity);
    Self {
      engine: Arc::new(Engine {
        config,
        catalog,
        services,
        events,
        state: Mutex::new(ControllerState::default()),
      }),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.engine.config
  }

  pub fn events(&self) -> &EventBus {
    &self.engine.events
  }

  pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
    self.engine.events.subscribe()
  }

  /// Starts `descriptor` as the root job. Must be called within a Tokio runtime.
  #[instrument(level = "trace", skip(self, options), fields(script = %descriptor.script))]
  pub fn start(
    &self,
    descriptor: JobDescriptor,
    user_token: impl Into<String> + std::fmt::Debug,
    options: StartOptions,
  ) -> Result<JobId, JobError> {
    let engine = &self.engine;
    let mut state = engine.state.lock();
    if state.active.is_some() {
      return Err(JobError::AlreadyRunning);
    }
    let script = engine
      .catalog
      .lookup(&descriptor.script)
      .ok_or_else(|| JobError::UnknownScript(descriptor.script.clone()))?;
    let code_hash = script.code_hash();

    let tree = options.checkpoint.map(|cp| {
      if !cp.matches(&code_hash) {
        warn!(
          script = %descriptor.script,
          checkpoint_hash = %cp.code_hash,
          %code_hash,
          "resuming from a checkpoint taken with a different script definition"
        );
      }
      cp.tree
    });
    let ledger = match &tree {
      Some(tree) => Ledger::from_checkpoint(tree.clone()),
      None => Ledger::new(),
    }
    .shared();
    let handle = Arc::new(
      JobHandle::root(descriptor)
        .with_early_stop(options.early_stop)
        .with_checkpoint(tree),
    );
    let job_id = handle.id;
    let cancel = CancellationToken::new();
    let pause = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = watch::channel(false);

    state.progress.reset();
    state.progress.track(0);
    state.input.abort_all();
    state.live.clear();
    state.live.insert(job_id);
    state.active = Some(ActiveJob {
      handle: handle.clone(),
      user_token: user_token.into(),
      started_at: Utc::now(),
      code_hash,
      cancel: cancel.clone(),
      pause: pause.clone(),
      ledger: ledger.clone(),
      state: JobState::Running,
      outcome: None,
      completion: done_rx,
    });
    engine.events.publish(JobEvent::Started {
      job_id,
      name: handle.descriptor.name.clone(),
      script: handle.descriptor.script.clone(),
    });
    drop(state);
    info!(
      %job_id,
      name = %handle.descriptor.name,
      resuming = handle.checkpoint.is_some(),
      "job started"
    );

    let site = ExecutionSite::root(engine.clone(), handle, ledger, cancel, pause);
    let engine = engine.clone();
    tokio::spawn(async move {
      let result = run_script(script, site).await;
      engine.complete(job_id, result);
      done_tx.send_replace(true);
    });
    Ok(job_id)
  }

  /// Raises the cancellation signal and aborts any outstanding input request.
  #[instrument(level = "trace", skip(self))]
  pub fn cancel(&self, job_id: JobId) -> Result<(), JobError> {
    let mut guard = self.engine.state.lock();
    let state = &mut *guard;
    let active = state.active_for(job_id)?;
    info!(%job_id, "cancelling job");
    active.cancel.cancel();
    state.input.abort_all();
    Ok(())
  }

  /// Requests a pause; observed after the next group finishes.
  #[instrument(level = "trace", skip(self))]
  pub fn pause(&self, job_id: JobId) -> Result<(), JobError> {
    let state = self.engine.state.lock();
    let active = state.active_for(job_id)?;
    info!(%job_id, "pause requested");
    active.pause.store(true, Ordering::SeqCst);
    Ok(())
  }

  /// Returns the outcome of a finished job. Unless `keep_open`, retires the slot.
  #[instrument(level = "trace", skip(self))]
  pub fn finish_and_get_result(&self, job_id: JobId, keep_open: bool) -> Result<Value, JobError> {
    let mut state = self.engine.state.lock();
    let outcome = state
      .active_for(job_id)?
      .outcome
      .clone()
      .ok_or(JobError::NotFinished(job_id))?;
    if !keep_open {
      state.active = None;
      self.engine.events.publish(JobEvent::Finished { job_id });
      info!(%job_id, "job retired");
    }
    outcome
  }

  /// Resolves once `job_id` reached a terminal state.
  pub async fn wait(&self, job_id: JobId) -> Result<(), JobError> {
    let mut completion = self.engine.state.lock().active_for(job_id)?.completion.clone();
    completion
      .wait_for(|done| *done)
      .await
      .map(|_| ())
      .map_err(|_| JobError::ScriptFailure("job task ended without reporting".to_string()))
  }

  /// Answers the outstanding input request of `job_id`.
  #[instrument(level = "trace", skip(self, value))]
  pub fn submit_input(&self, job_id: JobId, key: &str, value: Value) -> Result<(), JobError> {
    self.engine.state.lock().input.submit(job_id, key, value)
  }

  /// Builds the current-state snapshot, publishes it as `Current`, and returns it.
  pub fn resync(&self) -> CurrentSnapshot {
    let snapshot = {
      let state = self.engine.state.lock();
      CurrentSnapshot {
        job: state.active.as_ref().map(ActiveJob::info),
        progress: state.progress.snapshot(),
        pending_input: state.input.pending(),
        done: state
          .active
          .as_ref()
          .is_some_and(|a| a.outcome.is_some()),
      }
    };
    self
      .engine
      .events
      .publish(JobEvent::Current(snapshot.clone()));
    snapshot
  }

  /// The job occupying the root slot, if any.
  pub fn active_job(&self) -> Option<ActiveJobInfo> {
    self.engine.state.lock().active.as_ref().map(ActiveJob::info)
  }

  /// Point-in-time copy of the active job's group tree.
  pub fn group_snapshot(
    &self,
    job_id: JobId,
    include_repeat_metadata: bool,
  ) -> Result<Vec<GroupNode>, JobError> {
    let ledger = self.engine.state.lock().active_for(job_id)?.ledger.clone();
    let groups = ledger.lock().serialize(include_repeat_metadata);
    Ok(groups)
  }
}
