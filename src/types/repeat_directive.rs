//! Replay instructions supplied when resuming from a checkpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::GroupNode;

/// What to do with a recorded node on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
  /// Reuse the recorded result, do not execute the group body.
  Skip,
  /// Execute again, discarding the recorded result.
  Again,
}

/// A recorded node plus its replay instruction. Children carry their own
/// instructions, so a sub-tree of an `Again` node can still be partly skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatDirective {
  pub key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default)]
  pub is_script: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  pub repeat: RepeatMode,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<RepeatDirective>,
}

impl RepeatDirective {
  /// Builds a directive from a snapshot node. Uses the node's `repeat` hint when the
  /// snapshot carries one; otherwise finished nodes are skipped and open ones re-run.
  pub fn from_node(node: &GroupNode) -> Self {
    let repeat = node.repeat.unwrap_or(if node.is_finished() {
      RepeatMode::Skip
    } else {
      RepeatMode::Again
    });
    Self {
      key: node.key.clone(),
      name: node.name.clone(),
      is_script: node.is_script,
      details: node.details.clone(),
      result: node.result.clone(),
      repeat,
      children: node.children.iter().map(RepeatDirective::from_node).collect(),
    }
  }

  /// Reshapes a snapshot entirely into `Skip` directives.
  pub fn skip_all(nodes: &[GroupNode]) -> Vec<Self> {
    nodes
      .iter()
      .map(|n| Self::from_node(n).with_mode_recursive(RepeatMode::Skip))
      .collect()
  }

  pub fn with_mode(mut self, repeat: RepeatMode) -> Self {
    self.repeat = repeat;
    self
  }

  fn with_mode_recursive(mut self, repeat: RepeatMode) -> Self {
    self.repeat = repeat;
    self.children = self
      .children
      .into_iter()
      .map(|c| c.with_mode_recursive(repeat))
      .collect();
    self
  }

  /// The recorded node this directive was built from, without replay hints.
  pub fn to_node(&self) -> GroupNode {
    GroupNode {
      key: self.key.clone(),
      name: self.name.clone(),
      is_script: self.is_script,
      details: self.details.clone(),
      result: self.result.clone(),
      repeat: None,
      children: self.children.iter().map(RepeatDirective::to_node).collect(),
    }
  }
}
