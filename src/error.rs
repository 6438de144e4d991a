//! Error taxonomy of the job host.

use thiserror::Error;

use crate::types::{GroupNode, JobId};

/// Errors raised by the controller, the ledger, and running scripts.
///
/// `Cancelled` and `PausedEarly` double as unwinding signals: a script returns them with
/// `?` from any depth and the controller turns them into terminal job states.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
  #[error("a job is already running")]
  AlreadyRunning,
  #[error("job {0} is not the active job")]
  NotActive(JobId),
  #[error("no pending input request '{key}' for job {job_id}")]
  StaleOrUnknown { job_id: JobId, key: String },
  #[error("job {0} has not finished yet")]
  NotFinished(JobId),
  #[error("group finished without a matching start")]
  LedgerUnderflow,
  #[error("script failed: {0}")]
  ScriptFailure(String),
  #[error("operation cancelled")]
  Cancelled,
  #[error("job paused after {} completed group(s)", completed_groups(.groups))]
  PausedEarly { groups: Vec<GroupNode> },
  #[error("job {0} already has a pending input request")]
  InputPending(JobId),
  #[error("timed out waiting for input '{key}'")]
  InputTimeout { key: String },
  #[error("unknown script '{0}'")]
  UnknownScript(String),
  #[error("unexpected result type: {0}")]
  ResultType(String),
}

fn completed_groups(groups: &[GroupNode]) -> usize {
  groups.iter().filter(|g| g.is_finished()).count()
}

impl JobError {
  pub fn script(msg: impl Into<String>) -> Self {
    JobError::ScriptFailure(msg.into())
  }

  pub fn is_paused(&self) -> bool {
    matches!(self, JobError::PausedEarly { .. })
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, JobError::Cancelled)
  }

  /// Group snapshot carried by a pause, if any.
  pub fn groups(&self) -> Option<&[GroupNode]> {
    match self {
      JobError::PausedEarly { groups } => Some(groups),
      _ => None,
    }
  }
}
