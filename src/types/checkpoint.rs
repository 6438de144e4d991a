//! Checkpoint for resumable execution.

use serde::{Deserialize, Serialize};

use super::{GroupNode, RepeatDirective};

/// Checkpoint for resumable execution: the directive tree plus the hash of the script
/// definition the original snapshot was produced by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub code_hash: String,
  pub tree: Vec<RepeatDirective>,
}

impl Checkpoint {
  /// Reshapes a ledger snapshot into directives (finished nodes skip, open ones re-run).
  pub fn from_snapshot(code_hash: impl Into<String>, groups: &[GroupNode]) -> Self {
    Self {
      code_hash: code_hash.into(),
      tree: groups.iter().map(RepeatDirective::from_node).collect(),
    }
  }

  /// True when the checkpoint was taken from the same script definition.
  pub fn matches(&self, code_hash: &str) -> bool {
    self.code_hash == code_hash
  }
}
