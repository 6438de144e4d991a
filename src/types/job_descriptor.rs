//! Immutable request to start a job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable request to start a job: which script to run, under what name, and with
/// which preset input values. Read-only once the job is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
  /// Display name shown in notifications.
  pub name: String,
  /// Reference resolved through the [ScriptCatalog](crate::ScriptCatalog).
  pub script: String,
  /// Tag describing the expected result type (informational).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_type: Option<String>,
  /// Preset input values keyed by input name.
  #[serde(default)]
  pub inputs: HashMap<String, Value>,
}

impl JobDescriptor {
  pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      script: script.into(),
      result_type: None,
      inputs: HashMap::new(),
    }
  }

  pub fn with_result_type(mut self, result_type: impl Into<String>) -> Self {
    self.result_type = Some(result_type.into());
    self
  }

  pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
    self.inputs.insert(key.into(), value);
    self
  }

  /// Preset input value for `key`, if any.
  pub fn input(&self, key: &str) -> Option<&Value> {
    self.inputs.get(key)
  }
}
