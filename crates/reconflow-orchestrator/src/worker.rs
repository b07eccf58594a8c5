//! Worker pool consuming step work units.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::coordinator::Coordinator;
use crate::queue::WorkUnit;

/// A fixed number of tasks sharing one work-unit receiver.
///
/// Each worker takes exactly one unit at a time, executes it and re-enters
/// the coordinator; the receiver lock is only held while waiting for a unit.
pub struct WorkerPool {
  coordinator: Arc<Coordinator>,
  receiver: Arc<Mutex<mpsc::UnboundedReceiver<WorkUnit>>>,
  size: usize,
}

impl WorkerPool {
  pub fn new(coordinator: Arc<Coordinator>, receiver: mpsc::UnboundedReceiver<WorkUnit>, size: usize) -> Self {
    Self {
      coordinator,
      receiver: Arc::new(Mutex::new(receiver)),
      size: size.max(1),
    }
  }

  /// Spawn the workers. They stop when `cancel` fires or the queue closes.
  pub fn start(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    info!(workers = self.size, "starting worker pool");
    (0..self.size)
      .map(|worker| {
        let coordinator = self.coordinator.clone();
        let receiver = self.receiver.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
          loop {
            let unit = tokio::select! {
              _ = cancel.cancelled() => break,
              unit = async { receiver.lock().await.recv().await } => unit,
            };
            let Some(unit) = unit else {
              break;
            };

            if let Err(e) = coordinator.execute_step(unit.clone()).await {
              error!(
                worker,
                run_id = %unit.run_id,
                step_index = unit.step_index,
                error = %e,
                "step execution failed"
              );
            }
          }
          info!(worker, "worker stopped");
        })
      })
      .collect()
  }
}
