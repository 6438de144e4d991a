//! End-to-end scenarios through the public API: pause and resume across nested scripts,
//! listeners following a run through the event stream, and late-listener resync.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use script_host::{
  Checkpoint, ExecutionSite, InMemoryCatalog, JobController, JobDescriptor, JobError, JobEvent,
  JobState, Plan, RepeatMode, StartOptions, script_fn,
};
use serde_json::{Value, json};

/// `parent`: group 1, nested `child` (groups a, b), group 3; every group takes 100ms.
fn nested_catalog(runs: Arc<AtomicUsize>) -> InMemoryCatalog {
  async fn group(
    site: &ExecutionSite,
    key: &str,
    result: Value,
    runs: &AtomicUsize,
  ) -> Result<(), JobError> {
    if site.begin_group(key, None)?.should_execute() {
      runs.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(100)).await;
      site.end_group(result)?;
    }
    Ok(())
  }

  let child_runs = runs.clone();
  let child = script_fn(move |site: ExecutionSite| {
    let runs = child_runs.clone();
    async move {
      group(&site, "a", json!("a"), &runs).await?;
      group(&site, "b", json!("b"), &runs).await?;
      Ok(None)
    }
  });
  let parent = script_fn(move |site: ExecutionSite| {
    let runs = runs.clone();
    async move {
      group(&site, "1", json!(1), &runs).await?;
      site
        .run_value(JobDescriptor::new("child", "child"), Default::default())
        .await?;
      group(&site, "3", json!(3), &runs).await?;
      Ok(None)
    }
  })
  .with_code_hash("parent-v1");
  InMemoryCatalog::new()
    .with("child", child)
    .with("parent", parent)
}

#[tokio::test(start_paused = true)]
async fn pause_inside_nested_script_resumes_where_it_stopped() {
  let runs = Arc::new(AtomicUsize::new(0));
  let c = JobController::new(Arc::new(nested_catalog(runs.clone())));

  let id = c
    .start(JobDescriptor::new("parent", "parent"), "", StartOptions::default())
    .unwrap();
  // Group 1 ends at 100ms, child group `a` at 200ms.
  tokio::time::sleep(Duration::from_millis(150)).await;
  c.pause(id).unwrap();
  c.wait(id).await.unwrap();
  assert_eq!(c.active_job().unwrap().state, JobState::Paused);

  let Err(JobError::PausedEarly { groups }) = c.finish_and_get_result(id, false) else {
    panic!("expected the run to pause");
  };
  assert_eq!(groups.len(), 2);
  assert_eq!(groups[0].repeat, Some(RepeatMode::Skip));
  assert!(groups[1].is_script);
  assert_eq!(groups[1].children.len(), 1);
  assert_eq!(groups[1].children[0].key, "a");
  assert_eq!(runs.load(Ordering::SeqCst), 2);

  let checkpoint = Checkpoint::from_snapshot("parent-v1", &groups);
  let id = c
    .start(
      JobDescriptor::new("parent", "parent"),
      "",
      StartOptions::resume(checkpoint),
    )
    .unwrap();
  c.wait(id).await.unwrap();
  assert_eq!(
    c.finish_and_get_result(id, false).unwrap(),
    json!([1, "a", "b", 3])
  );
  // Only `b` and `3` ran on resume.
  assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn listeners_follow_a_run_through_the_event_stream() {
  let plan = Plan::from_json(
    r#"{"name": "main", "steps": [
      { "kind": "group", "key": "1", "delay_ms": 10 },
      { "kind": "group", "key": "2", "delay_ms": 10 }
    ]}"#,
  )
  .unwrap();
  let c = JobController::new(Arc::new(plan.catalog()));
  let events = c.events().stream();

  let id = c
    .start(JobDescriptor::new("main", "main"), "", StartOptions::default())
    .unwrap();
  c.wait(id).await.unwrap();
  c.finish_and_get_result(id, false).unwrap();

  let seen: Vec<JobEvent> = events
    .take_while(|e| futures::future::ready(!matches!(e, JobEvent::Finished { .. })))
    .collect()
    .await;
  assert!(matches!(seen.first(), Some(JobEvent::Started { .. })));
  assert!(matches!(seen.last(), Some(JobEvent::Done { .. })));
  let ratios: Vec<f64> = seen
    .iter()
    .filter_map(|e| match e {
      JobEvent::Progress { samples, .. } => Some(samples[0].ratio),
      _ => None,
    })
    .collect();
  assert_eq!(ratios, vec![0.5, 1.0]);
  assert!(seen.iter().all(|e| e.job_id() == Some(id)));
}

#[tokio::test]
async fn late_listener_resyncs_current_state() {
  let script = script_fn(|site: ExecutionSite| async move {
    site.report_progress(json!("waiting"), 0.3, Some("ask"));
    let v = site.request_input("answer", Some("number"), None).await?;
    Ok(Some(v))
  });
  let c = JobController::new(Arc::new(InMemoryCatalog::new().with("ask", script)));
  let mut early = c.subscribe();
  let id = c
    .start(JobDescriptor::new("ask", "ask"), "user-7", StartOptions::default())
    .unwrap();
  loop {
    if let JobEvent::InputRequest(_) = early.recv().await.unwrap() {
      break;
    }
  }

  let snapshot = c.resync();
  let job = snapshot.job.unwrap();
  assert_eq!(job.job_id, id);
  assert_eq!(job.user_token, "user-7");
  assert_eq!(job.state, JobState::Running);
  assert_eq!(snapshot.progress[0].ratio, 0.3);
  assert_eq!(snapshot.pending_input[0].key, "answer");
  assert!(!snapshot.done);

  c.submit_input(id, "answer", json!(42)).unwrap();
  c.wait(id).await.unwrap();
  assert!(c.resync().done);
  assert_eq!(c.finish_and_get_result(id, false).unwrap(), json!(42));
}
