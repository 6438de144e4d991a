//! Tests for `EventBus`.

use futures::StreamExt;
use uuid::Uuid;

use crate::notify::EventBus;
use crate::types::JobEvent;

#[tokio::test]
async fn subscribers_receive_published_events() {
  let bus = EventBus::default();
  let mut rx1 = bus.subscribe();
  let mut rx2 = bus.subscribe();
  let id = Uuid::new_v4();
  bus.publish(JobEvent::Done { job_id: id });
  assert_eq!(rx1.recv().await.unwrap(), JobEvent::Done { job_id: id });
  assert_eq!(rx2.recv().await.unwrap(), JobEvent::Done { job_id: id });
}

#[test]
fn publish_without_subscribers_does_not_panic() {
  let bus = EventBus::new(4);
  bus.publish(JobEvent::Finished {
    job_id: Uuid::new_v4(),
  });
}

#[tokio::test]
async fn stream_skips_lagged_gap() {
  let bus = EventBus::new(2);
  let stream = bus.stream();
  tokio::pin!(stream);
  let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
  for id in &ids {
    bus.publish(JobEvent::Done { job_id: *id });
  }
  let first = stream.next().await.unwrap();
  assert_eq!(first, JobEvent::Done { job_id: ids[2] });
  let second = stream.next().await.unwrap();
  assert_eq!(second, JobEvent::Done { job_id: ids[3] });
}
