//! Outward notification channel backed by a `tokio::sync::broadcast` channel.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::types::JobEvent;

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out bus for [JobEvent]s. Any number of listeners receive every event published
/// after they subscribed; a listener that joins late asks for a resync instead of history.
#[derive(Debug, Clone)]
pub struct EventBus {
  sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
  /// When the buffer is full the oldest events are dropped for slow receivers.
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { sender }
  }

  /// Publishes to all current subscribers; a no-op when nobody listens.
  pub fn publish(&self, event: JobEvent) {
    trace!(?event, "publishing job event");
    let _ = self.sender.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
    self.sender.subscribe()
  }

  /// Subscription as a stream; lagged gaps are skipped.
  pub fn stream(&self) -> impl Stream<Item = JobEvent> + Send + 'static {
    BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move { item.ok() })
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(DEFAULT_EVENT_CAPACITY)
  }
}
