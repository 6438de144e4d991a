//! Tests for parallel composition through `ExecutionSite::run_parallel`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::controller::JobController;
use crate::error::JobError;
use crate::script::{InMemoryCatalog, Script, script_fn};
use crate::site::ExecutionSite;
use crate::types::{JobDescriptor, JobState, StartOptions};

/// Records when the early-stop predicate was first observed, relative to the job start.
type StopSeen = Arc<Mutex<Option<Duration>>>;

fn leader(delay_ms: u64) -> impl Script {
  script_fn(move |site: ExecutionSite| async move {
    site.begin_group("lead", None)?;
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    site.end_group(json!("lead"))?;
    Ok(None)
  })
}

/// Polls the early-stop predicate every 50ms for `total_ms`; stops on it if `obey`.
fn sibling(total_ms: u64, obey: bool, seen: StopSeen) -> impl Script {
  script_fn(move |site: ExecutionSite| {
    let seen = seen.clone();
    async move {
      let started = Instant::now();
      while started.elapsed() < Duration::from_millis(total_ms) {
        if site.should_stop_early() {
          seen.lock().get_or_insert(started.elapsed());
          if obey {
            break;
          }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
      }
      Ok(Some(json!({"ran_ms": started.elapsed().as_millis() as u64})))
    }
  })
}

fn composer(leading: Option<usize>) -> impl Script {
  script_fn(move |site: ExecutionSite| async move {
    let started = Instant::now();
    let results = site
      .run_parallel(
        vec![
          JobDescriptor::new("lead", "lead"),
          JobDescriptor::new("other", "other"),
        ],
        leading,
      )
      .await?;
    Ok(Some(json!({
      "results": results,
      "elapsed_ms": started.elapsed().as_millis() as u64,
    })))
  })
}

async fn run(catalog: InMemoryCatalog) -> (JobController, Result<Value, JobError>) {
  let c = JobController::new(Arc::new(catalog));
  let id = c
    .start(JobDescriptor::new("main", "main"), "", StartOptions::default())
    .unwrap();
  c.wait(id).await.unwrap();
  let result = c.finish_and_get_result(id, true);
  (c, result)
}

#[tokio::test(start_paused = true)]
async fn leading_job_signals_siblings_and_composer_waits_for_all() {
  let seen = StopSeen::default();
  let catalog = InMemoryCatalog::new()
    .with("lead", leader(500))
    .with("other", sibling(750, false, seen.clone()))
    .with("main", composer(Some(0)));
  let (c, result) = run(catalog).await;
  let out = result.unwrap();

  let stop_seen = (*seen.lock()).expect("sibling observed the stop flag");
  assert!(stop_seen >= Duration::from_millis(500));
  assert!(out["elapsed_ms"].as_u64().unwrap() >= 750);
  assert_eq!(out["results"][0], json!(["lead"]));
  assert!(out["results"][1]["ran_ms"].as_u64().unwrap() >= 750);

  // Nested ledgers appear in start order.
  let id = c.active_job().unwrap().job_id;
  let tree = c.group_snapshot(id, false).unwrap();
  assert_eq!(tree.len(), 2);
  assert!(tree.iter().all(|n| n.is_script));
  assert_eq!(tree[0].key, "lead");
  assert_eq!(tree[1].key, "other");
}

#[tokio::test(start_paused = true)]
async fn obedient_sibling_winds_down_after_leader() {
  let seen = StopSeen::default();
  let catalog = InMemoryCatalog::new()
    .with("lead", leader(500))
    .with("other", sibling(2_000, true, seen.clone()))
    .with("main", composer(Some(0)));
  let (_c, result) = run(catalog).await;
  let out = result.unwrap();

  let elapsed = out["elapsed_ms"].as_u64().unwrap();
  assert!((500..2_000).contains(&elapsed));
  let ran = out["results"][1]["ran_ms"].as_u64().unwrap();
  assert!(ran >= 500 && ran < 2_000);
}

#[tokio::test(start_paused = true)]
async fn without_leading_nobody_is_signalled() {
  let seen = StopSeen::default();
  let catalog = InMemoryCatalog::new()
    .with("lead", leader(100))
    .with("other", sibling(300, true, seen.clone()))
    .with("main", composer(None));
  let (_c, result) = run(catalog).await;
  let out = result.unwrap();
  assert!(seen.lock().is_none());
  assert!(out["results"][1]["ran_ms"].as_u64().unwrap() >= 300);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_leading_is_ignored() {
  let seen = StopSeen::default();
  let catalog = InMemoryCatalog::new()
    .with("lead", leader(100))
    .with("other", sibling(200, true, seen.clone()))
    .with("main", composer(Some(5)));
  let (_c, result) = run(catalog).await;
  assert!(result.is_ok());
  assert!(seen.lock().is_none());
}

#[tokio::test(start_paused = true)]
async fn failing_sibling_fails_the_batch_after_all_finish() {
  let seen = StopSeen::default();
  let catalog = InMemoryCatalog::new()
    .with(
      "lead",
      script_fn(|_site| async { Err(JobError::script("lead broke")) }),
    )
    .with("other", sibling(300, false, seen.clone()))
    .with("main", composer(Some(0)));
  let (_c, result) = run(catalog).await;
  assert_eq!(result, Err(JobError::ScriptFailure("lead broke".to_string())));
  assert!(seen.lock().is_some());
}

#[tokio::test(start_paused = true)]
async fn unknown_script_in_batch_leaves_ledger_untouched() {
  let main = script_fn(|site: ExecutionSite| async move {
    let err = site
      .run_parallel(
        vec![
          JobDescriptor::new("lead", "lead"),
          JobDescriptor::new("missing", "missing"),
        ],
        Some(0),
      )
      .await
      .unwrap_err();
    assert_eq!(err, JobError::UnknownScript("missing".to_string()));
    assert!(site.ledger().lock().serialize(false).is_empty());
    site.begin_group("after", None)?;
    site.end_group(json!("after"))?;
    Ok(None)
  });
  let catalog = InMemoryCatalog::new()
    .with("lead", leader(100))
    .with("main", main);
  let (c, result) = run(catalog).await;
  assert_eq!(result.unwrap(), json!(["after"]));

  let id = c.active_job().unwrap().job_id;
  let tree = c.group_snapshot(id, false).unwrap();
  assert_eq!(tree.len(), 1);
  assert_eq!(tree[0].key, "after");
  assert!(!tree[0].is_script);
}

/// Sleeps for a minute unless cancelled; counts how many times cancellation was observed.
fn cancellable(observed: Arc<AtomicUsize>) -> impl Script {
  script_fn(move |site: ExecutionSite| {
    let observed = observed.clone();
    async move {
      tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(None),
        _ = site.cancellation().cancelled() => {
          observed.fetch_add(1, Ordering::SeqCst);
          Err(JobError::Cancelled)
        }
      }
    }
  })
}

#[tokio::test(start_paused = true)]
async fn cancel_reaches_every_parallel_sibling() {
  let observed = Arc::new(AtomicUsize::new(0));
  let catalog = InMemoryCatalog::new()
    .with("lead", cancellable(observed.clone()))
    .with("other", cancellable(observed.clone()))
    .with("main", composer(Some(0)));
  let c = JobController::new(Arc::new(catalog));
  let id = c
    .start(JobDescriptor::new("main", "main"), "", StartOptions::default())
    .unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;

  c.cancel(id).unwrap();
  c.wait(id).await.unwrap();
  assert_eq!(observed.load(Ordering::SeqCst), 2);
  assert_eq!(c.active_job().unwrap().state, JobState::Cancelled);
  assert_eq!(c.finish_and_get_result(id, false), Err(JobError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn nested_task_outliving_its_root_keeps_off_the_next_progress_table() {
  // Abandons its parallel batch after 10ms; the spawned child keeps running to 500ms.
  let abandons = script_fn(|site: ExecutionSite| async move {
    tokio::select! {
      _ = site.run_parallel(vec![JobDescriptor::new("slow", "slow")], None) => {}
      _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }
    Ok(None)
  });
  let slow = script_fn(|_site: ExecutionSite| async move {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(None)
  });
  let reporting = script_fn(|site: ExecutionSite| async move {
    site.report_progress(json!({"phase": "busy"}), 0.5, Some("child"));
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    Ok(None)
  });
  let parent = script_fn(|site: ExecutionSite| async move {
    site
      .run_value(JobDescriptor::new("reporting", "reporting"), Default::default())
      .await?;
    Ok(None)
  });
  let catalog = InMemoryCatalog::new()
    .with("abandons", abandons)
    .with("slow", slow)
    .with("reporting", reporting)
    .with("parent", parent);
  let c = JobController::new(Arc::new(catalog));

  let first = c
    .start(JobDescriptor::new("first", "abandons"), "", StartOptions::default())
    .unwrap();
  c.wait(first).await.unwrap();
  c.finish_and_get_result(first, false).unwrap();

  let second = c
    .start(JobDescriptor::new("second", "parent"), "", StartOptions::default())
    .unwrap();
  tokio::time::sleep(Duration::from_millis(700)).await;
  let progress = c.resync().progress;
  assert!(
    progress.iter().any(|s| s.depth == 1 && s.info == json!({"phase": "busy"})),
    "depth 1 sample pruned: {progress:?}"
  );

  c.wait(second).await.unwrap();
  assert!(c.finish_and_get_result(second, false).is_ok());
}
