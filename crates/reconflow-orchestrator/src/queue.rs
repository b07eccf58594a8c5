use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::OrchestratorError;

/// A unit of work: execute one step of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
  pub run_id: String,
  pub step_index: usize,
  /// Handle recorded on the step when it was claimed.
  pub task_handle: String,
}

/// A named queue of step work units.
#[async_trait]
pub trait WorkQueue: Send + Sync {
  fn name(&self) -> &str;

  async fn enqueue(&self, unit: WorkUnit) -> Result<(), OrchestratorError>;
}

/// In-process queue backed by an unbounded mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
  name: String,
  sender: mpsc::UnboundedSender<WorkUnit>,
}

impl ChannelQueue {
  /// Create a queue and the receiver workers consume from.
  pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<WorkUnit>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
      Self {
        name: name.into(),
        sender,
      },
      receiver,
    )
  }
}

#[async_trait]
impl WorkQueue for ChannelQueue {
  fn name(&self) -> &str {
    &self.name
  }

  async fn enqueue(&self, unit: WorkUnit) -> Result<(), OrchestratorError> {
    self
      .sender
      .send(unit)
      .map_err(|_| OrchestratorError::QueueClosed {
        queue: self.name.clone(),
      })
  }
}
