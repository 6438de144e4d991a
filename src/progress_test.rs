//! Tests for `ProgressAggregator`.

use serde_json::json;

use crate::progress::ProgressAggregator;
use crate::types::ProgressSample;

fn sample(depth: usize, ratio: f64) -> ProgressSample {
  ProgressSample::new(depth, json!({"depth": depth}), ratio, None)
}

#[test]
fn report_replaces_per_depth() {
  let mut p = ProgressAggregator::new();
  p.track(0);
  p.report(sample(0, 0.1));
  p.report(sample(0, 0.5));
  let snap = p.snapshot();
  assert_eq!(snap.len(), 1);
  assert_eq!(snap[0].ratio, 0.5);
}

#[test]
fn snapshot_is_in_depth_order() {
  let mut p = ProgressAggregator::new();
  p.track(0);
  p.track(2);
  p.track(1);
  p.report(sample(2, 0.2));
  p.report(sample(0, 0.0));
  p.report(sample(1, 0.1));
  let depths: Vec<usize> = p.snapshot().iter().map(|s| s.depth).collect();
  assert_eq!(depths, vec![0, 1, 2]);
}

#[test]
fn release_prunes_depth_after_last_job() {
  let mut p = ProgressAggregator::new();
  p.track(0);
  p.track(1);
  p.track(1);
  p.report(sample(0, 0.3));
  p.report(sample(1, 0.4));
  p.release(1);
  assert_eq!(p.snapshot().len(), 2);
  p.release(1);
  let snap = p.snapshot();
  assert_eq!(snap.len(), 1);
  assert_eq!(snap[0].depth, 0);
}

#[test]
fn root_sample_survives_release() {
  let mut p = ProgressAggregator::new();
  p.track(0);
  p.report(sample(0, 1.0));
  p.release(0);
  assert_eq!(p.snapshot().len(), 1);
  p.reset();
  assert!(p.snapshot().is_empty());
}

#[test]
fn release_of_untracked_depth_is_ignored() {
  let mut p = ProgressAggregator::new();
  p.report(sample(3, 0.5));
  p.release(3);
  assert_eq!(p.snapshot().len(), 1);
}

#[test]
fn ratio_is_clamped() {
  assert_eq!(sample(0, 1.7).ratio, 1.0);
  assert_eq!(sample(0, -0.2).ratio, 0.0);
  assert_eq!(sample(0, f64::NAN).ratio, 0.0);
}
