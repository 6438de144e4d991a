//! Persists checkpoints handed back by a paused job so a later process can resume it.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::types::Checkpoint;

/// File name of the checkpoint inside a run directory.
pub const CHECKPOINT_FILENAME: &str = "checkpoint.json";

pub fn checkpoint_path(run_dir: &Path) -> PathBuf {
  run_dir.join(CHECKPOINT_FILENAME)
}

/// Writes `checkpoint` as pretty JSON, creating parent directories. The file is written
/// next to its target and renamed, so a reader never sees a partial checkpoint.
#[instrument(level = "trace", skip(checkpoint))]
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> io::Result<()> {
  let json = serde_json::to_string_pretty(checkpoint)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let tmp = path.with_extension("json.tmp");
  std::fs::write(&tmp, json)?;
  std::fs::rename(&tmp, path)?;
  debug!(path = %path.display(), groups = checkpoint.tree.len(), "checkpoint saved");
  Ok(())
}

#[instrument(level = "trace")]
pub fn load_checkpoint(path: &Path) -> io::Result<Checkpoint> {
  let bytes = std::fs::read(path)?;
  serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Removes the checkpoint of `run_dir` once a resumed run completed. Missing is fine.
pub fn clear_checkpoint(run_dir: &Path) -> io::Result<()> {
  match std::fs::remove_file(checkpoint_path(run_dir)) {
    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}
