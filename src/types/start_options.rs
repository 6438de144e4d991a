//! Options accepted when starting root and nested jobs.

use super::{Checkpoint, EarlyStop};

/// Options for [JobController::start](crate::JobController::start).
#[derive(Default, Clone)]
pub struct StartOptions {
  /// Resume from this checkpoint instead of recording a fresh ledger.
  pub checkpoint: Option<Checkpoint>,
  /// Predicate the root script may poll to wind down voluntarily.
  pub early_stop: Option<EarlyStop>,
}

impl StartOptions {
  pub fn resume(checkpoint: Checkpoint) -> Self {
    Self {
      checkpoint: Some(checkpoint),
      early_stop: None,
    }
  }
}

/// Options for a nested run started from inside a job.
#[derive(Default, Clone)]
pub struct NestedOptions {
  pub early_stop: Option<EarlyStop>,
}
