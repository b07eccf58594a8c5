//! Run events and publishers.
//!
//! Events are published on a per-run channel (`run:<run_id>`) for UIs and
//! other observers. Delivery is fire-and-forget and at-most-once: publishing
//! never fails and never blocks the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
  RunQueued,
  RunStarted,
  RunFailed,
  RunCompleted,
  RunCanceled,
  RunPaused,
  RunResumed,
  StepDispatched,
  StepSkipped,
  StepCompleted,
  StepFailed,
  StepCanceled,
}

/// A run or step state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
  #[serde(rename = "type")]
  pub event_type: RunEventType,
  pub run_id: String,
  pub ts: DateTime<Utc>,
  #[serde(default)]
  pub payload: Value,
}

impl RunEvent {
  pub fn new(event_type: RunEventType, run_id: impl Into<String>, payload: Value) -> Self {
    Self {
      event_type,
      run_id: run_id.into(),
      ts: Utc::now(),
      payload,
    }
  }
}

/// Channel name for a run's events.
pub fn run_channel(run_id: &str) -> String {
  format!("run:{run_id}")
}

/// Trait for publishing run events.
pub trait EventPublisher: Send + Sync {
  fn publish(&self, channel: &str, event: RunEvent);
}

/// A no-op publisher that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
  fn publish(&self, _channel: &str, _event: RunEvent) {}
}

/// A publisher backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose events; with no subscribers events are
/// dropped.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
  sender: broadcast::Sender<(String, RunEvent)>,
}

impl BroadcastPublisher {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity);
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<(String, RunEvent)> {
    self.sender.subscribe()
  }
}

impl EventPublisher for BroadcastPublisher {
  fn publish(&self, channel: &str, event: RunEvent) {
    // Ignore send errors - there may be no subscribers
    let _ = self.sender.send((channel.to_string(), event));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_event_wire_shape() {
    let event = RunEvent::new(RunEventType::StepSkipped, "run-1", json!({ "step_index": 1 }));
    let encoded = serde_json::to_value(&event).unwrap();
    assert_eq!(encoded["type"], "step_skipped");
    assert_eq!(encoded["run_id"], "run-1");
    assert_eq!(encoded["payload"]["step_index"], 1);
    assert_eq!(run_channel("run-1"), "run:run-1");
  }

  #[tokio::test]
  async fn test_broadcast_publisher() {
    let publisher = BroadcastPublisher::new(16);
    // Publishing without subscribers is fine.
    publisher.publish("run:a", RunEvent::new(RunEventType::RunQueued, "a", Value::Null));

    let mut rx = publisher.subscribe();
    publisher.publish("run:b", RunEvent::new(RunEventType::RunStarted, "b", Value::Null));
    let (channel, event) = rx.recv().await.unwrap();
    assert_eq!(channel, "run:b");
    assert_eq!(event.event_type, RunEventType::RunStarted);
  }
}
