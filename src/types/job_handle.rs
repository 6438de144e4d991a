//! Runtime identity of a running job (root or nested).

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{JobDescriptor, RepeatDirective};

/// Generated unique id of a job.
pub type JobId = Uuid;

/// Early-stop predicate polled by a script at its own safe points.
pub type EarlyStop = Arc<dyn Fn() -> bool + Send + Sync>;

/// Runtime identity of a running job.
///
/// Exactly one handle is the root (depth 0); nested jobs get their own handle one
/// level deeper than the job that started them.
#[derive(Clone)]
pub struct JobHandle {
  pub id: JobId,
  pub descriptor: Arc<JobDescriptor>,
  pub depth: usize,
  pub early_stop: Option<EarlyStop>,
  /// Directive tree the job's ledger was seeded from, if resuming.
  pub checkpoint: Option<Vec<RepeatDirective>>,
}

impl JobHandle {
  pub fn root(descriptor: JobDescriptor) -> Self {
    Self {
      id: Uuid::new_v4(),
      descriptor: Arc::new(descriptor),
      depth: 0,
      early_stop: None,
      checkpoint: None,
    }
  }

  /// Handle for a job started by `self`, one level deeper.
  pub fn nested(&self, descriptor: JobDescriptor) -> Self {
    Self {
      id: Uuid::new_v4(),
      descriptor: Arc::new(descriptor),
      depth: self.depth + 1,
      early_stop: None,
      checkpoint: None,
    }
  }

  pub fn with_early_stop(mut self, early_stop: Option<EarlyStop>) -> Self {
    self.early_stop = early_stop;
    self
  }

  pub fn with_checkpoint(mut self, checkpoint: Option<Vec<RepeatDirective>>) -> Self {
    self.checkpoint = checkpoint;
    self
  }

  pub fn is_root(&self) -> bool {
    self.depth == 0
  }

  /// Evaluates the early-stop predicate; false when none was supplied.
  pub fn should_stop_early(&self) -> bool {
    self.early_stop.as_ref().is_some_and(|stop| stop())
  }
}

impl fmt::Debug for JobHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobHandle")
      .field("id", &self.id)
      .field("name", &self.descriptor.name)
      .field("script", &self.descriptor.script)
      .field("depth", &self.depth)
      .field("early_stop", &self.early_stop.is_some())
      .field("resuming", &self.checkpoint.is_some())
      .finish()
  }
}
