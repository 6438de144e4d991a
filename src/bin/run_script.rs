//! CLI: run a plan (JSON) through the job host.
//!
//! Usage: `run_script [OPTIONS] <plan.json>`
//!
//! Ctrl-C (or `--pause-after-ms`) requests a pause. The job unwinds at the next group
//! boundary and its checkpoint is written to `<run-dir>/checkpoint.json`; pass it back
//! with `--resume` to skip every group that already finished.
//!
//! Exit status: 0 done, 1 failed or cancelled, 2 paused.
//!
//! Set RUST_LOG=script_host=trace for TRACE-level span enter/exit and events.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use script_host::checkpoint_io::{
  checkpoint_path, clear_checkpoint, load_checkpoint, save_checkpoint,
};
use script_host::{
  Checkpoint, EngineConfig, JobController, JobDescriptor, JobError, JobEvent, Plan, ScriptCatalog,
  ServiceContext, StartOptions,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

const RUN_DIR: &str = ".script-host";

/// Run a plan of execution groups, pausing and resuming through checkpoints.
#[derive(Parser, Debug)]
#[command(name = "run_script")]
#[command(
  after_help = r#"Environment variables:
  SCRIPT_HOST_RUN_DIR              Overrides --run-dir when set.
  SCRIPT_HOST_EVENT_CAPACITY       Notification buffer size (default 1024).
  SCRIPT_HOST_INPUT_TIMEOUT_MS     Default wait for user input.
  SCRIPT_HOST_PROGRESS_GROUPS      Attach group snapshots to progress events (true/false).

Examples:
  run_script plan.json
  run_script --pause-after-ms 250 plan.json
  run_script --resume .script-host/checkpoint.json plan.json"#
)]
struct Args {
  /// Resume from this checkpoint file.
  #[arg(long, value_name = "FILE")]
  resume: Option<PathBuf>,

  /// Directory the checkpoint of a paused run is written to. Overridden by SCRIPT_HOST_RUN_DIR.
  #[arg(long, value_name = "DIR", default_value = RUN_DIR)]
  run_dir: PathBuf,

  /// Request a pause after this many milliseconds.
  #[arg(long, value_name = "MS")]
  pause_after_ms: Option<u64>,

  /// Path to the plan file
  #[arg(value_name = "plan.json")]
  plan_path: PathBuf,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    .init();

  let args = Args::parse();
  let run_dir = std::env::var("SCRIPT_HOST_RUN_DIR")
    .ok()
    .map(PathBuf::from)
    .unwrap_or_else(|| args.run_dir.clone());
  info!(
    plan = %args.plan_path.display(),
    run_dir = %run_dir.display(),
    resume = ?args.resume,
    "run_script starting"
  );

  let plan = match fs::read_to_string(&args.plan_path).map(|s| Plan::from_json(&s)) {
    Ok(Ok(plan)) => plan,
    Ok(Err(e)) => {
      eprintln!("Error parsing plan: {}", e);
      process::exit(1);
    }
    Err(e) => {
      eprintln!("Error reading {}: {}", args.plan_path.display(), e);
      process::exit(1);
    }
  };

  let checkpoint = match &args.resume {
    Some(path) => match load_checkpoint(path) {
      Ok(cp) => Some(cp),
      Err(e) => {
        eprintln!("Error loading checkpoint {}: {}", path.display(), e);
        process::exit(1);
      }
    },
    None => None,
  };

  let catalog = Arc::new(plan.catalog());
  let code_hash = catalog
    .lookup(&plan.name)
    .map(|s| s.code_hash())
    .unwrap_or_default();
  let controller =
    JobController::with_config(catalog, EngineConfig::from_env(), ServiceContext::new());

  let mut events = Box::pin(controller.events().stream());
  tokio::spawn(async move {
    while let Some(event) = events.next().await {
      match event {
        JobEvent::Progress { samples, .. } => {
          for s in samples {
            info!(depth = s.depth, ratio = s.ratio, name = ?s.name, "progress");
          }
        }
        JobEvent::InputRequest(request) => {
          warn!(key = %request.key, "plan asked for input; run_script cannot answer it");
        }
        _ => {}
      }
    }
  });

  let options = StartOptions {
    checkpoint,
    early_stop: None,
  };
  let job_id = match controller.start(JobDescriptor::new(&plan.name, &plan.name), "cli", options) {
    Ok(id) => id,
    Err(e) => {
      eprintln!("Start error: {}", e);
      process::exit(1);
    }
  };

  let pauser = controller.clone();
  tokio::spawn(async move {
    match args.pause_after_ms {
      Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
      None => {
        if tokio::signal::ctrl_c().await.is_err() {
          return;
        }
      }
    }
    info!(%job_id, "requesting pause");
    let _ = pauser.pause(job_id);
  });

  if let Err(e) = controller.wait(job_id).await {
    eprintln!("Job error: {}", e);
    process::exit(1);
  }
  match controller.finish_and_get_result(job_id, false) {
    Ok(result) => {
      if let Err(e) = clear_checkpoint(&run_dir) {
        warn!(error = %e, "could not remove stale checkpoint");
      }
      println!("Job completed.");
      println!("  Result: {}", result);
    }
    Err(JobError::PausedEarly { groups }) => {
      let path = checkpoint_path(&run_dir);
      let checkpoint = Checkpoint::from_snapshot(code_hash, &groups);
      if let Err(e) = save_checkpoint(&path, &checkpoint) {
        eprintln!("Error writing checkpoint {}: {}", path.display(), e);
        process::exit(1);
      }
      println!("Job paused.");
      println!("  Checkpoint: {}", path.display());
      process::exit(2);
    }
    Err(e) => {
      eprintln!("Job failed: {}", e);
      process::exit(1);
    }
  }
}
