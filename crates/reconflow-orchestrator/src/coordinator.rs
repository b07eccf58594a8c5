//! Run state machine.
//!
//! Every invocation reloads the run and its steps from the store, so calling
//! [`Coordinator::advance`] repeatedly (after a worker finishes, from the
//! promoter, after a resume) is safe. Step claims are compare-and-swap
//! updates, which keeps at most one step per run RUNNING even when
//! invocations overlap.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use reconflow_adapter::{AdapterRegistry, FailureReason};
use reconflow_artifact::Store as ArtifactStore;
use reconflow_manifest::StepSummary;
use reconflow_policy::Stage;
use reconflow_store::{
  Json, RunStatus, ScanHistory, StepFinish, StepStatus, StepUpdate, Store, WorkflowRun, WorkflowRunStep,
};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::admission::AdmissionController;
use crate::composer::InputComposer;
use crate::error::OrchestratorError;
use crate::events::{EventPublisher, NoopPublisher, RunEvent, RunEventType, run_channel};
use crate::queue::{WorkQueue, WorkUnit};
use crate::step::{StepInput, StepOutput};

/// Output and batch limits applied by the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
  /// Characters of raw adapter output kept in history (the tail).
  pub raw_output_tail_chars: usize,
  /// Characters kept of adapter messages.
  pub message_max_chars: usize,
  /// Oldest QUEUED runs looked at per promotion pass.
  pub promoter_batch_size: u32,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      raw_output_tail_chars: 4000,
      message_max_chars: 500,
      promoter_batch_size: 50,
    }
  }
}

/// Drives runs from QUEUED to a terminal status.
pub struct Coordinator {
  pub(crate) store: Arc<dyn Store>,
  pub(crate) queue: Arc<dyn WorkQueue>,
  pub(crate) admission: AdmissionController,
  pub(crate) artifacts: Arc<dyn ArtifactStore>,
  pub(crate) composer: InputComposer,
  pub(crate) adapters: AdapterRegistry,
  pub(crate) publisher: Arc<dyn EventPublisher>,
  pub(crate) limits: Limits,
}

impl Coordinator {
  pub fn new(
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    admission: AdmissionController,
    artifacts: Arc<dyn ArtifactStore>,
    composer: InputComposer,
    adapters: AdapterRegistry,
  ) -> Self {
    Self {
      store,
      queue,
      admission,
      artifacts,
      composer,
      adapters,
      publisher: Arc::new(NoopPublisher),
      limits: Limits::default(),
    }
  }

  pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
    self.publisher = publisher;
    self
  }

  pub fn with_limits(mut self, limits: Limits) -> Self {
    self.limits = limits;
    self
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub fn admission(&self) -> &AdmissionController {
    &self.admission
  }

  pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
    &self.artifacts
  }

  pub fn composer(&self) -> &InputComposer {
    &self.composer
  }

  pub(crate) fn publish(&self, event_type: RunEventType, run_id: &str, payload: serde_json::Value) {
    self
      .publisher
      .publish(&run_channel(run_id), RunEvent::new(event_type, run_id, payload));
  }

  /// Advance a run as far as it can go without waiting on a worker.
  ///
  /// When the run frees its admission slot, the oldest QUEUED runs are
  /// advanced too.
  #[instrument(skip(self))]
  pub async fn advance(&self, run_id: &str) -> Result<(), OrchestratorError> {
    self.drive(run_id, false).await
  }

  /// Promote as many QUEUED runs as per-user capacity allows, oldest first.
  /// Returns how many left QUEUED.
  pub async fn promote(&self) -> Result<usize, OrchestratorError> {
    let mut promoted = 0;
    for run_id in self.promotion_candidates().await? {
      if let Err(e) = self.advance(&run_id).await {
        warn!(run_id = %run_id, error = %e, "promotion failed");
        continue;
      }
      if self.store.get_run(&run_id).await?.status != RunStatus::Queued {
        promoted += 1;
      }
    }
    if promoted > 0 {
      info!(promoted, "promoted queued runs");
    }
    Ok(promoted)
  }

  /// Cancel a non-terminal run. Returns false when the run was already
  /// terminal.
  pub async fn cancel(&self, run_id: &str) -> Result<bool, OrchestratorError> {
    let run = self.store.get_run(run_id).await?;
    for from in [RunStatus::Queued, RunStatus::Running, RunStatus::Paused] {
      if !self
        .store
        .transition_run(run_id, from, RunStatus::Canceled, Some("CANCELED"), Utc::now())
        .await?
      {
        continue;
      }

      info!(run_id = %run_id, from = from.as_str(), "run_canceled");
      self.publish(RunEventType::RunCanceled, run_id, json!({ "from": from.as_str() }));
      if from.holds_slot() {
        self.admission.release(&run.user_id).await?;
      }
      self.drive(run_id, from.holds_slot()).await?;
      return Ok(true);
    }
    Ok(false)
  }

  /// Stop dispatching for a RUNNING run. The admission slot is kept.
  pub async fn pause(&self, run_id: &str) -> Result<bool, OrchestratorError> {
    let paused = self
      .store
      .transition_run(run_id, RunStatus::Running, RunStatus::Paused, None, Utc::now())
      .await?;
    if paused {
      info!(run_id = %run_id, "run_paused");
      self.publish(RunEventType::RunPaused, run_id, json!({}));
    }
    Ok(paused)
  }

  /// Resume a PAUSED run and continue dispatching.
  pub async fn resume(&self, run_id: &str) -> Result<bool, OrchestratorError> {
    let resumed = self
      .store
      .transition_run(run_id, RunStatus::Paused, RunStatus::Running, None, Utc::now())
      .await?;
    if resumed {
      info!(run_id = %run_id, "run_resumed");
      self.publish(RunEventType::RunResumed, run_id, json!({}));
      self.advance(run_id).await?;
    }
    Ok(resumed)
  }

  /// Advance `run_id`, then every promotion candidate whenever a slot frees.
  pub(crate) async fn drive(&self, run_id: &str, slot_freed: bool) -> Result<(), OrchestratorError> {
    let mut pending = VecDeque::from([run_id.to_string()]);
    if slot_freed {
      pending.extend(self.promotion_candidates().await?);
    }

    while let Some(next) = pending.pop_front() {
      match self.advance_once(&next).await {
        Ok(true) => pending.extend(self.promotion_candidates().await?),
        Ok(false) => {}
        Err(e) if next != run_id => {
          warn!(run_id = %next, error = %e, "failed to advance promoted run");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  async fn promotion_candidates(&self) -> Result<Vec<String>, OrchestratorError> {
    Ok(
      self
        .store
        .list_runs_by_status(RunStatus::Queued, self.limits.promoter_batch_size)
        .await?
        .into_iter()
        .map(|run| run.run_id)
        .collect(),
    )
  }

  /// One pass over a run. Returns true when the run released its slot.
  async fn advance_once(&self, run_id: &str) -> Result<bool, OrchestratorError> {
    let run = self.store.get_run(run_id).await?;
    match run.status {
      RunStatus::Completed | RunStatus::Failed => Ok(false),
      RunStatus::Canceled => {
        let canceled = self.store.cancel_queued_steps(run_id, Utc::now()).await?;
        if canceled > 0 {
          debug!(run_id = %run_id, canceled, "canceled queued steps");
          self.publish(RunEventType::StepCanceled, run_id, json!({ "count": canceled }));
        }
        Ok(false)
      }
      RunStatus::Paused => Ok(false),
      RunStatus::Queued => {
        if !self.start(&run).await? {
          return Ok(false);
        }
        self.dispatch_next(run_id).await
      }
      RunStatus::Running => self.dispatch_next(run_id).await,
    }
  }

  /// Preflight, admission and the QUEUED -> RUNNING transition.
  async fn start(&self, run: &WorkflowRun) -> Result<bool, OrchestratorError> {
    let steps = self.store.list_steps(&run.run_id).await?;
    if let Some(violation) = preflight(&steps)? {
      let message = format!("PREFLIGHT: {violation}");
      if self
        .store
        .transition_run(&run.run_id, RunStatus::Queued, RunStatus::Failed, Some(&message), Utc::now())
        .await?
      {
        self.store.cancel_queued_steps(&run.run_id, Utc::now()).await?;
        error!(run_id = %run.run_id, reason = %violation, "run_failed");
        self.publish(
          RunEventType::RunFailed,
          &run.run_id,
          json!({ "reason": "PREFLIGHT", "message": message }),
        );
      }
      return Ok(false);
    }

    if !self.admission.try_acquire(&run.user_id).await? {
      debug!(run_id = %run.run_id, user_id = %run.user_id, "run waits for admission");
      return Ok(false);
    }

    if !self
      .store
      .transition_run(&run.run_id, RunStatus::Queued, RunStatus::Running, None, Utc::now())
      .await?
    {
      // Someone else moved the run first.
      self.admission.release(&run.user_id).await?;
      return Ok(false);
    }

    info!(run_id = %run.run_id, user_id = %run.user_id, total_steps = run.total_steps, "run_started");
    self.publish(RunEventType::RunStarted, &run.run_id, json!({ "user_id": run.user_id }));
    Ok(true)
  }

  /// Skip ineligible steps, dispatch the next eligible one, or complete the
  /// run. Returns true when the run completed.
  async fn dispatch_next(&self, run_id: &str) -> Result<bool, OrchestratorError> {
    loop {
      let run = self.store.get_run(run_id).await?;
      if run.status != RunStatus::Running {
        return Ok(false);
      }

      let steps = self.store.list_steps(run_id).await?;
      if steps.iter().any(|s| s.status == StepStatus::Running) {
        return Ok(false);
      }
      let Some(step) = steps.iter().find(|s| s.status == StepStatus::Queued) else {
        return self.complete(&run).await;
      };

      let step_index = step.step_index as usize;
      let mut input = StepInput::from_step(step)?;

      if !self.is_eligible(&run, &input).await {
        let output = StepOutput::new(StepStatus::Skipped, "no input in consumed buckets");
        self
          .finish_without_dispatch(&run, &steps, step, output, None)
          .await?;
        info!(run_id = %run_id, step_index, tool = %input.tool_slug, "step_skipped");
        self.publish(
          RunEventType::StepSkipped,
          run_id,
          json!({ "step_index": step_index, "tool": input.tool_slug }),
        );
        continue;
      }

      let options = match self
        .composer
        .compose(run_id, &run.manifest.0, &steps, step_index, &input)
        .await
      {
        Ok(options) => options,
        Err(e) => {
          let message = truncate(&e.to_string(), self.limits.message_max_chars);
          let now = Utc::now();
          let history = ScanHistory {
            history_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            step_index: step.step_index,
            tool_slug: input.tool_slug.clone(),
            params: Json(serde_json::Value::Object(input.config.params.clone())),
            success: false,
            failure_reason: Some(FailureReason::InvalidParams.as_str().to_string()),
            message: Some(message.clone()),
            raw_output: String::new(),
            duration_ms: 0,
            started_at: now,
            completed_at: now,
          };
          self.store.create_history(&history).await?;

          let output = StepOutput::new(StepStatus::Failed, message).with_reason(FailureReason::InvalidParams);
          self
            .finish_without_dispatch(&run, &steps, step, output, Some(history.history_id))
            .await?;
          warn!(run_id = %run_id, step_index, tool = %input.tool_slug, error = %e, "step_failed");
          self.publish(
            RunEventType::StepFailed,
            run_id,
            json!({ "step_index": step_index, "tool": input.tool_slug, "error_reason": "INVALID_PARAMS" }),
          );
          continue;
        }
      };

      let target_count = options.target_count();
      input.options = Some(options);
      let task_handle = uuid::Uuid::new_v4().to_string();
      if !self
        .store
        .claim_step(run_id, step.step_index, &task_handle, &input.to_value()?, Utc::now())
        .await?
      {
        debug!(run_id = %run_id, step_index, "step already claimed");
        return Ok(false);
      }

      self
        .queue
        .enqueue(WorkUnit {
          run_id: run_id.to_string(),
          step_index,
          task_handle: task_handle.clone(),
        })
        .await?;

      info!(
        run_id = %run_id,
        step_index,
        tool = %input.tool_slug,
        targets = target_count,
        queue = self.queue.name(),
        "step_dispatched"
      );
      self.publish(
        RunEventType::StepDispatched,
        run_id,
        json!({ "step_index": step_index, "tool": input.tool_slug, "task_handle": task_handle }),
      );
      return Ok(false);
    }
  }

  /// Move a QUEUED step straight to SKIPPED or FAILED and record it on the
  /// run in the same write.
  async fn finish_without_dispatch(
    &self,
    run: &WorkflowRun,
    steps: &[WorkflowRunStep],
    step: &WorkflowRunStep,
    output: StepOutput,
    history_id: Option<String>,
  ) -> Result<(), OrchestratorError> {
    let status = output.status.unwrap_or(StepStatus::Failed);
    let mut update = StepUpdate::new(status).with_output(output.to_value()?);
    if let Some(history_id) = history_id {
      update = update.with_history(history_id);
    }

    let mut manifest = run.manifest.0.clone();
    manifest.record_step(
      step.step_index as usize,
      StepSummary {
        tool_slug: step.tool_slug.clone(),
        status: status.as_str().to_string(),
        message: Some(output.message.clone()),
        error_reason: output.error_reason.map(|r| r.as_str().to_string()),
        ..Default::default()
      },
    );

    let done = steps
      .iter()
      .filter(|s| s.step_index != step.step_index && s.status.counts_as_progress())
      .count()
      + usize::from(status.counts_as_progress());
    let outcome = self
      .store
      .finish_step(
        &run.run_id,
        step.step_index,
        StepStatus::Queued,
        &update,
        &manifest,
        progress(done, run.total_steps),
        Utc::now(),
      )
      .await?;
    if outcome == StepFinish::Stale {
      debug!(run_id = %run.run_id, step_index = step.step_index, "step already left QUEUED");
    }
    Ok(())
  }

  /// A step with consumed buckets runs only when one of them holds data, in
  /// the aggregated buckets, the seeds, or the node's own local input.
  async fn is_eligible(&self, run: &WorkflowRun, input: &StepInput) -> bool {
    let consumes = &input.policy.consumes;
    if consumes.is_empty() || consumes.iter().any(|kind| run.manifest.0.is_available(*kind)) {
      return true;
    }
    self.composer.has_local_input(input).await
  }

  async fn complete(&self, run: &WorkflowRun) -> Result<bool, OrchestratorError> {
    if !self
      .store
      .transition_run(&run.run_id, RunStatus::Running, RunStatus::Completed, None, Utc::now())
      .await?
    {
      return Ok(false);
    }

    self.admission.release(&run.user_id).await?;
    info!(run_id = %run.run_id, "run_completed");
    self.publish(RunEventType::RunCompleted, &run.run_id, json!({ "progress": 100.0 }));
    Ok(true)
  }
}

/// First stage-order violation in a run's steps, if any.
fn preflight(steps: &[WorkflowRunStep]) -> Result<Option<String>, OrchestratorError> {
  let mut highest: Option<(Stage, String)> = None;
  for step in steps {
    let input = StepInput::from_step(step)?;
    let Some(stage) = input.policy.stage else {
      continue;
    };
    if let Some((seen, seen_tool)) = &highest {
      if stage.rank() < seen.rank() {
        return Ok(Some(format!(
          "step {} ({}, {}) runs after {} ({})",
          step.step_index,
          input.tool_slug,
          stage.as_str(),
          seen_tool,
          seen.as_str()
        )));
      }
      if stage.rank() == seen.rank() {
        continue;
      }
    }
    highest = Some((stage, input.tool_slug));
  }
  Ok(None)
}

/// `round(100 * done / total, 2)`.
pub(crate) fn progress(done: usize, total: i64) -> f64 {
  if total <= 0 {
    return 100.0;
  }
  (100.0 * done as f64 / total as f64 * 100.0).round() / 100.0
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
  text.chars().take(max_chars).collect()
}

/// The last `max_chars` characters of `text`.
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
  let count = text.chars().count();
  if count <= max_chars {
    return text.to_string();
  }
  text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use reconflow_policy::ToolPolicy;
  use reconflow_store::Json;

  fn step_with(index: i64, policy: ToolPolicy) -> WorkflowRunStep {
    let input = StepInput {
      node_id: format!("n{index}"),
      tool_slug: policy.slug.clone(),
      policy,
      config: Default::default(),
      input_from: None,
      options: None,
    };
    WorkflowRunStep {
      run_id: "run-1".to_string(),
      step_index: index,
      node_id: format!("n{index}"),
      tool_slug: input.tool_slug.clone(),
      status: StepStatus::Queued,
      input_manifest: Json(input.to_value().unwrap()),
      output_manifest: None,
      task_handle: None,
      history_id: None,
      started_at: None,
      completed_at: None,
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn test_progress_rounding() {
    assert_eq!(progress(1, 3), 33.33);
    assert_eq!(progress(2, 3), 66.67);
    assert_eq!(progress(3, 3), 100.0);
    assert_eq!(progress(0, 4), 0.0);
  }

  #[test]
  fn test_tail_and_truncate_count_chars() {
    assert_eq!(tail("héllo wörld", 5), "wörld");
    assert_eq!(tail("abc", 10), "abc");
    assert_eq!(truncate("héllo", 2), "hé");
  }

  #[test]
  fn test_preflight_rejects_backwards_stage() {
    let steps = vec![
      step_with(0, ToolPolicy::new("nuclei", "vuln")),
      step_with(1, ToolPolicy::new("httpx", "probe")),
    ];
    let violation = preflight(&steps).unwrap().unwrap();
    assert!(violation.contains("httpx"));
  }

  #[test]
  fn test_preflight_allows_equal_and_unknown_stages() {
    let steps = vec![
      step_with(0, ToolPolicy::new("subfinder", "subdomain")),
      step_with(1, ToolPolicy::new("amass", "subdomain")),
      step_with(2, ToolPolicy::empty("mystery")),
      step_with(3, ToolPolicy::new("httpx", "probe")),
    ];
    assert!(preflight(&steps).unwrap().is_none());
  }
}
