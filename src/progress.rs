//! Progress aggregation across the root job and its live nested jobs.

use std::collections::BTreeMap;

use tracing::instrument;

use crate::types::ProgressSample;

/// Latest progress sample per nesting depth (last write wins, no history).
///
/// Depths are reference-counted by the number of live jobs at that depth, so parallel
/// siblings share one slot and the slot is pruned when the last of them is torn down.
/// The root sample (depth 0) is kept until [ProgressAggregator::reset].
#[derive(Debug, Default)]
pub struct ProgressAggregator {
  samples: BTreeMap<usize, ProgressSample>,
  live: BTreeMap<usize, usize>,
}

impl ProgressAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Forgets everything; called when a new root job starts.
  pub fn reset(&mut self) {
    self.samples.clear();
    self.live.clear();
  }

  /// Registers a live job at `depth`.
  pub fn track(&mut self, depth: usize) {
    *self.live.entry(depth).or_default() += 1;
  }

  /// Unregisters a live job at `depth`, pruning the depth once no job is left there.
  #[instrument(level = "trace", skip(self))]
  pub fn release(&mut self, depth: usize) {
    let Some(count) = self.live.get_mut(&depth) else {
      return;
    };
    *count = count.saturating_sub(1);
    if *count == 0 {
      self.live.remove(&depth);
      if depth > 0 {
        self.samples.remove(&depth);
      }
    }
  }

  /// Replaces the sample stored for `sample.depth`.
  pub fn report(&mut self, sample: ProgressSample) {
    self.samples.insert(sample.depth, sample);
  }

  /// All known samples in depth order.
  pub fn snapshot(&self) -> Vec<ProgressSample> {
    self.samples.values().cloned().collect()
  }
}
