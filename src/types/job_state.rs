//! Lifecycle state of the root job slot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job occupying the root slot.
///
/// `Idle` and `Retired` are both represented by an empty slot in the controller;
/// this enum covers the states a job reports while it still occupies the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Running,
  Done,
  Failed,
  Cancelled,
  Paused,
}

impl JobState {
  /// True once the job body has returned, whatever the outcome.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, JobState::Running)
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobState::Running => write!(f, "running"),
      JobState::Done => write!(f, "done"),
      JobState::Failed => write!(f, "failed"),
      JobState::Cancelled => write!(f, "cancelled"),
      JobState::Paused => write!(f, "paused"),
    }
  }
}
