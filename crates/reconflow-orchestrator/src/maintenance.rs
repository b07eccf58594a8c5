//! Periodic promoter and reconciler loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::coordinator::Coordinator;
use crate::reconciler::Reconciler;

/// Promote queued runs every `interval` until canceled.
pub fn spawn_promoter(
  coordinator: Arc<Coordinator>,
  interval: Duration,
  cancel: CancellationToken,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {
          if let Err(e) = coordinator.promote().await {
            error!(error = %e, "promotion pass failed");
          }
        }
      }
    }
    info!("promoter stopped");
  })
}

/// Run both reconciler sweeps every `interval` until canceled.
pub fn spawn_reconciler(
  reconciler: Arc<Reconciler>,
  interval: Duration,
  cancel: CancellationToken,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {
          match reconciler.run_once(Utc::now()).await {
            Ok(report) => debug!(
              zombies = report.zombies,
              pruned = report.pruned,
              promoted = report.promoted,
              "reconcile pass finished"
            ),
            Err(e) => error!(error = %e, "reconcile pass failed"),
          }
        }
      }
    }
    info!("reconciler stopped");
  })
}
