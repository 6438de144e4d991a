//! Events published on the notification channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GroupNode, JobId, JobState, ProgressSample};

/// Outstanding user-input request, as published to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
  pub job_id: JobId,
  pub key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value_type: Option<String>,
  /// Hint for the client to close its prompt after this many milliseconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub auto_close_delay_ms: Option<u64>,
}

/// Summary of the job occupying the root slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJobInfo {
  pub job_id: JobId,
  pub name: String,
  pub script: String,
  pub user_token: String,
  pub state: JobState,
  pub started_at: DateTime<Utc>,
}

/// Current-state snapshot sent to a late-joining listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSnapshot {
  pub job: Option<ActiveJobInfo>,
  pub progress: Vec<ProgressSample>,
  pub pending_input: Vec<InputRequest>,
  pub done: bool,
}

/// One event per job transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
  Started {
    job_id: JobId,
    name: String,
    script: String,
  },
  Progress {
    job_id: JobId,
    samples: Vec<ProgressSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    groups: Option<Vec<GroupNode>>,
  },
  Done {
    job_id: JobId,
  },
  Error {
    job_id: JobId,
    message: String,
    /// True when the job unwound at a group boundary because of a pause request.
    paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_hash: Option<String>,
    groups: Vec<GroupNode>,
  },
  Finished {
    job_id: JobId,
  },
  InputRequest(InputRequest),
  Current(CurrentSnapshot),
}

impl JobEvent {
  /// Job the event refers to; `None` for a resync snapshot without an active job.
  pub fn job_id(&self) -> Option<JobId> {
    match self {
      JobEvent::Started { job_id, .. }
      | JobEvent::Progress { job_id, .. }
      | JobEvent::Done { job_id }
      | JobEvent::Error { job_id, .. }
      | JobEvent::Finished { job_id } => Some(*job_id),
      JobEvent::InputRequest(req) => Some(req.job_id),
      JobEvent::Current(current) => current.job.as_ref().map(|j| j.job_id),
    }
  }

  /// True for `Done` and `Error`, the events after which a result can be collected.
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobEvent::Done { .. } | JobEvent::Error { .. })
  }
}
