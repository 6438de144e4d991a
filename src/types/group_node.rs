//! Snapshot node of the execution-group ledger.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RepeatMode;

fn is_false(b: &bool) -> bool {
  !*b
}

/// One node of a ledger snapshot: a named execution group, or a synthetic wrapper
/// around a nested script invocation (`is_script`).
///
/// Children appear in the order they were started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
  /// Group key, scoped to the script that started it.
  pub key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "is_false")]
  pub is_script: bool,
  /// Free-form details supplied by the interpreter when the group was begun.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<Value>,
  /// Recorded result; `None` while the group is still open.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  /// Replay hint, only filled when a snapshot is taken with repeat metadata.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub repeat: Option<RepeatMode>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<GroupNode>,
}

impl GroupNode {
  pub fn group(key: impl Into<String>, name: Option<String>) -> Self {
    Self {
      key: key.into(),
      name,
      is_script: false,
      details: None,
      result: None,
      repeat: None,
      children: vec![],
    }
  }

  pub fn script(key: impl Into<String>, name: Option<String>) -> Self {
    Self {
      is_script: true,
      ..Self::group(key, name)
    }
  }

  pub fn with_result(mut self, result: Value) -> Self {
    self.result = Some(result);
    self
  }

  pub fn with_children(mut self, children: Vec<GroupNode>) -> Self {
    self.children = children;
    self
  }

  /// A plain group is finished once it carries a result; a script wrapper once every
  /// child is finished.
  pub fn is_finished(&self) -> bool {
    if self.is_script {
      self.children.iter().all(GroupNode::is_finished)
    } else {
      self.result.is_some()
    }
  }

  /// Appends results post-order (children before self). Script wrappers contribute
  /// only their children; open groups contribute `Value::Null`.
  pub fn flatten_into(&self, out: &mut Vec<Value>) {
    for child in &self.children {
      child.flatten_into(out);
    }
    if !self.is_script {
      out.push(self.result.clone().unwrap_or(Value::Null));
    }
  }

  /// Number of nodes in this subtree, including `self`.
  pub fn count(&self) -> usize {
    1 + self.children.iter().map(GroupNode::count).sum::<usize>()
  }
}
