//! Stale-run and retention sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reconflow_adapter::FailureReason;
use reconflow_store::{RunStatus, StepStatus, StepUpdate, WorkflowRun, WorkflowRunStep};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::OrchestratorError;
use crate::events::RunEventType;
use crate::step::{StepInput, StepOutput};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  pub zombies: usize,
  pub pruned: usize,
  pub promoted: usize,
}

pub struct Reconciler {
  coordinator: Arc<Coordinator>,
  stale_horizon: Duration,
  retention: Duration,
}

impl Reconciler {
  pub fn new(coordinator: Arc<Coordinator>, stale_horizon: Duration, retention: Duration) -> Self {
    Self {
      coordinator,
      stale_horizon,
      retention,
    }
  }

  /// Run both sweeps.
  pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileReport, OrchestratorError> {
    let (zombies, promoted) = self.sweep_stale(now).await?;
    let pruned = self.prune(now).await?;
    Ok(ReconcileReport {
      zombies,
      pruned,
      promoted,
    })
  }

  /// Force-fail RUNNING runs without an update within the horizon, then
  /// promote queued runs into the freed slots. Returns `(failed, promoted)`.
  pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<(usize, usize), OrchestratorError> {
    let cutoff = window_start(now, self.stale_horizon);
    let store = self.coordinator.store();

    let mut failed = 0;
    for run in store.list_stale_runs(cutoff).await? {
      match self.fail_zombie(&run, now).await {
        Ok(true) => failed += 1,
        Ok(false) => {}
        Err(e) => error!(run_id = %run.run_id, error = %e, "failed to reap stale run"),
      }
    }

    let promoted = if failed > 0 {
      self.coordinator.promote().await?
    } else {
      0
    };
    Ok((failed, promoted))
  }

  async fn fail_zombie(&self, run: &WorkflowRun, now: DateTime<Utc>) -> Result<bool, OrchestratorError> {
    let store = self.coordinator.store();
    let steps = store.list_steps(&run.run_id).await?;
    if let Some(step) = steps.iter().find(|s| s.status == StepStatus::Running)
      && let Some(deadline) = step_deadline(step)?
      && deadline > now
    {
      debug!(
        run_id = %run.run_id,
        step_index = step.step_index,
        tool = %step.tool_slug,
        deadline = %deadline,
        "running step within its timeout, not reaped"
      );
      return Ok(false);
    }

    let idle = now - run.updated_at;
    let message = format!("ZOMBIE: no progress for {} minutes", idle.num_minutes());

    if !store
      .transition_run(&run.run_id, RunStatus::Running, RunStatus::Failed, Some(&message), now)
      .await?
    {
      return Ok(false);
    }
    self.coordinator.admission().release(&run.user_id).await?;

    let output = StepOutput::new(StepStatus::Failed, message.clone()).with_reason(FailureReason::Zombie);
    let update = StepUpdate::new(StepStatus::Failed).with_output(output.to_value()?);
    for step in steps.iter().filter(|s| s.status == StepStatus::Running) {
      if store
        .update_step(&run.run_id, step.step_index, StepStatus::Running, &update, now)
        .await?
      {
        self.coordinator.publish(
          RunEventType::StepFailed,
          &run.run_id,
          json!({
            "step_index": step.step_index,
            "tool": step.tool_slug,
            "error_reason": FailureReason::Zombie,
            "message": message,
          }),
        );
      }
    }
    store.cancel_queued_steps(&run.run_id, now).await?;

    warn!(run_id = %run.run_id, user_id = %run.user_id, idle_minutes = idle.num_minutes(), "run_failed");
    self.coordinator.publish(
      RunEventType::RunFailed,
      &run.run_id,
      json!({ "reason": "ZOMBIE", "message": message }),
    );
    Ok(true)
  }

  /// Delete terminal runs created before the retention window, with their
  /// staged artifacts and scratch directories.
  pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize, OrchestratorError> {
    let cutoff = window_start(now, self.retention);
    let store = self.coordinator.store();

    let mut pruned = 0;
    for run in store.list_expired_runs(cutoff).await? {
      if let Err(e) = self.coordinator.artifacts().delete_prefix(&run.run_id).await {
        warn!(run_id = %run.run_id, error = %e, "failed to delete staged artifacts");
        continue;
      }
      let scratch = self.coordinator.composer().run_scratch_dir(&run.run_id);
      match tokio::fs::remove_dir_all(&scratch).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %scratch.display(), error = %e, "failed to remove scratch directory"),
      }
      store.delete_run(&run.run_id).await?;
      pruned += 1;
    }

    if pruned > 0 {
      info!(pruned, "pruned expired runs");
    }
    Ok(pruned)
  }
}

/// When a RUNNING step's own timeout runs out.
fn step_deadline(step: &WorkflowRunStep) -> Result<Option<DateTime<Utc>>, OrchestratorError> {
  let Some(started_at) = step.started_at else {
    return Ok(None);
  };
  let timeout = StepInput::from_step(step)?.policy.timeout();
  Ok(
    chrono::Duration::from_std(timeout)
      .ok()
      .and_then(|timeout| started_at.checked_add_signed(timeout)),
  )
}

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(window)
    .ok()
    .and_then(|window| now.checked_sub_signed(window))
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
