//! Brokers user-input requests between running jobs and external responders.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, instrument};

use crate::error::JobError;
use crate::types::{InputRequest, JobId};

/// How a pending input request was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum InputReply {
  Value(Value),
  Cancelled,
}

#[derive(Debug)]
struct PendingInput {
  request: InputRequest,
  reply: oneshot::Sender<InputReply>,
}

/// At most one outstanding request per job; each response is delivered exactly once.
#[derive(Debug, Default)]
pub struct InputBroker {
  pending: HashMap<JobId, PendingInput>,
}

impl InputBroker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `request`; the returned receiver resolves when it is answered or aborted.
  #[instrument(level = "trace", skip(self))]
  pub fn open(&mut self, request: InputRequest) -> Result<oneshot::Receiver<InputReply>, JobError> {
    if self.pending.contains_key(&request.job_id) {
      return Err(JobError::InputPending(request.job_id));
    }
    let (reply, rx) = oneshot::channel();
    self
      .pending
      .insert(request.job_id, PendingInput { request, reply });
    Ok(rx)
  }

  /// Delivers `value` to the request outstanding for `job_id` under `key`.
  #[instrument(level = "trace", skip(self, value))]
  pub fn submit(&mut self, job_id: JobId, key: &str, value: Value) -> Result<(), JobError> {
    let stale = || JobError::StaleOrUnknown {
      job_id,
      key: key.to_string(),
    };
    match self.pending.get(&job_id) {
      Some(p) if p.request.key == key => {}
      _ => return Err(stale()),
    }
    let pending = self.pending.remove(&job_id).ok_or_else(stale)?;
    pending
      .reply
      .send(InputReply::Value(value))
      .map_err(|_| stale())
  }

  /// Drops the request of `job_id` (timeout or job teardown). Returns whether one existed.
  pub fn withdraw(&mut self, job_id: JobId) -> bool {
    self.pending.remove(&job_id).is_some()
  }

  /// Resolves every outstanding request as cancelled.
  pub fn abort_all(&mut self) {
    for (job_id, pending) in self.pending.drain() {
      debug!(%job_id, key = %pending.request.key, "aborting input request");
      let _ = pending.reply.send(InputReply::Cancelled);
    }
  }

  /// Outstanding requests, for resync.
  pub fn pending(&self) -> Vec<InputRequest> {
    self.pending.values().map(|p| p.request.clone()).collect()
  }

  pub fn is_pending(&self, job_id: JobId) -> bool {
    self.pending.contains_key(&job_id)
  }
}
