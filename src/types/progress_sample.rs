//! Latest progress report of one nesting depth.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Latest progress report of one nesting depth. Replaced, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
  pub depth: usize,
  pub info: Value,
  /// Completion ratio, clamped to `0.0..=1.0`.
  pub ratio: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
}

impl ProgressSample {
  pub fn new(depth: usize, info: Value, ratio: f64, name: Option<String>) -> Self {
    let ratio = if ratio.is_nan() {
      0.0
    } else {
      ratio.clamp(0.0, 1.0)
    };
    Self {
      depth,
      info,
      ratio,
      name,
    }
  }
}
