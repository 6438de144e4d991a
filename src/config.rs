//! Engine configuration with environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::notify::DEFAULT_EVENT_CAPACITY;

/// Environment variable overriding [EngineConfig::event_capacity].
pub const ENV_EVENT_CAPACITY: &str = "SCRIPT_HOST_EVENT_CAPACITY";
/// Environment variable overriding [EngineConfig::input_timeout_ms].
pub const ENV_INPUT_TIMEOUT_MS: &str = "SCRIPT_HOST_INPUT_TIMEOUT_MS";
/// Environment variable overriding [EngineConfig::input_auto_close_ms].
pub const ENV_INPUT_AUTO_CLOSE_MS: &str = "SCRIPT_HOST_INPUT_AUTO_CLOSE_MS";
/// Environment variable overriding [EngineConfig::progress_includes_groups].
pub const ENV_PROGRESS_GROUPS: &str = "SCRIPT_HOST_PROGRESS_GROUPS";

/// Configuration of a [JobController](crate::JobController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Buffer of the notification broadcast channel.
  pub event_capacity: usize,
  /// Default wait for a user-input response; `None` waits until answered or cancelled.
  pub input_timeout_ms: Option<u64>,
  /// Auto-close hint published with every input request.
  pub input_auto_close_ms: Option<u64>,
  /// Attach a ledger snapshot to every progress event.
  pub progress_includes_groups: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      event_capacity: DEFAULT_EVENT_CAPACITY,
      input_timeout_ms: None,
      input_auto_close_ms: None,
      progress_includes_groups: true,
    }
  }
}

impl EngineConfig {
  /// Defaults overlaid with `SCRIPT_HOST_*` environment variables.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Defaults overlaid with values from `lookup`. Unparsable values are logged and ignored.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut config = Self::default();
    if let Some(v) = parse(&lookup, ENV_EVENT_CAPACITY) {
      config.event_capacity = v;
    }
    if let Some(v) = parse(&lookup, ENV_INPUT_TIMEOUT_MS) {
      config.input_timeout_ms = Some(v);
    }
    if let Some(v) = parse(&lookup, ENV_INPUT_AUTO_CLOSE_MS) {
      config.input_auto_close_ms = Some(v);
    }
    if let Some(v) = parse(&lookup, ENV_PROGRESS_GROUPS) {
      config.progress_includes_groups = v;
    }
    config
  }

  pub fn input_timeout(&self) -> Option<Duration> {
    self.input_timeout_ms.map(Duration::from_millis)
  }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
  let raw = lookup(key)?;
  match raw.trim().parse() {
    Ok(v) => Some(v),
    Err(_) => {
      warn!(key, value = %raw, "ignoring unparsable configuration value");
      None
    }
  }
}
