//! Step execution, performed by a worker for one claimed step.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use reconflow_adapter::{AdapterOptions, AdapterResult, FailureReason, ToolAdapter};
use reconflow_artifact::{file_stream, staging_key};
use reconflow_manifest::StepSummary;
use reconflow_policy::ToolPolicy;
use reconflow_store::{Json, ScanHistory, StepFinish, StepStatus, StepUpdate};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::coordinator::{Coordinator, progress, tail, truncate};
use crate::error::OrchestratorError;
use crate::events::RunEventType;
use crate::queue::WorkUnit;
use crate::step::{StepInput, StepOutput};

impl Coordinator {
  /// Execute one claimed step and advance its run.
  ///
  /// Adapter failures, timeouts and panics become a FAILED step; only store
  /// and queue errors are returned.
  #[instrument(skip(self, unit), fields(run_id = %unit.run_id, step_index = unit.step_index))]
  pub async fn execute_step(&self, unit: WorkUnit) -> Result<(), OrchestratorError> {
    let run_id = unit.run_id.as_str();
    let index = unit.step_index as i64;

    let step = self.store.get_step(run_id, index).await?;
    if step.status != StepStatus::Running || step.task_handle.as_deref() != Some(unit.task_handle.as_str()) {
      debug!(status = step.status.as_str(), "stale work unit ignored");
      return Ok(());
    }

    let input = StepInput::from_step(&step)?;
    let run = self.store.get_run(run_id).await?;
    if run.status.is_terminal() {
      let output = StepOutput::new(StepStatus::Canceled, "CANCELED").with_reason(FailureReason::Canceled);
      let update = StepUpdate::new(StepStatus::Canceled).with_output(output.to_value()?);
      if self
        .store
        .update_step(run_id, index, StepStatus::Running, &update, Utc::now())
        .await?
      {
        info!(tool = %input.tool_slug, run_status = run.status.as_str(), "step canceled before start");
        self.publish(
          RunEventType::StepCanceled,
          run_id,
          json!({ "step_index": unit.step_index, "tool": input.tool_slug }),
        );
      }
      return self.advance(run_id).await;
    }

    let options = input.options.clone().ok_or_else(|| OrchestratorError::MissingOptions {
      run_id: run_id.to_string(),
      step_index: unit.step_index,
    })?;
    let params = Value::Object(options.params.clone());

    let started_at = Utc::now();
    let clock = Instant::now();
    let result = self.invoke(&input.policy, options.clone()).await;
    let duration_ms = clock.elapsed().as_millis() as i64;
    let completed_at = Utc::now();

    let message = truncate(&result.message, self.limits.message_max_chars);
    let history = ScanHistory {
      history_id: uuid::Uuid::new_v4().to_string(),
      run_id: run_id.to_string(),
      step_index: index,
      tool_slug: input.tool_slug.clone(),
      params: Json(params),
      success: result.is_ok(),
      failure_reason: result.error_reason.map(|r| r.as_str().to_string()),
      message: Some(message.clone()),
      raw_output: tail(&result.diagnostics.raw_output, self.limits.raw_output_tail_chars),
      duration_ms,
      started_at,
      completed_at,
    };
    self.store.create_history(&history).await?;

    let artifact = self.stage_artifact(&options, &result).await;
    let status = if result.is_ok() {
      StepStatus::Completed
    } else {
      StepStatus::Failed
    };

    // Reload: the run may have been canceled or reaped while the adapter ran.
    let run = self.store.get_run(run_id).await?;
    let mut manifest = run.manifest.0.clone();
    let merged = manifest.merge_all(unit.step_index, &input.tool_slug, &result.buckets);
    manifest.record_step(
      unit.step_index,
      StepSummary {
        tool_slug: input.tool_slug.clone(),
        status: status.as_str().to_string(),
        message: Some(message.clone()),
        error_reason: result.error_reason.map(|r| r.as_str().to_string()),
        added: merged.added.clone(),
        duplicates: merged.duplicates,
        artifact: artifact.clone(),
      },
    );

    let output = StepOutput {
      status: Some(status),
      message: message.clone(),
      error_reason: result.error_reason,
      buckets: result.buckets.clone(),
      output_file: result.output_file.clone(),
      artifact,
      added: merged.added.clone(),
      duplicates: merged.duplicates,
    };
    let update = StepUpdate::new(status)
      .with_output(output.to_value()?)
      .with_history(history.history_id.clone());

    let steps = self.store.list_steps(run_id).await?;
    let done = steps
      .iter()
      .filter(|s| s.step_index != index && s.status.counts_as_progress())
      .count()
      + usize::from(status.counts_as_progress());
    let progress = progress(done, run.total_steps);

    // Step status and run manifest land together, so an advance that sees
    // this step finished also sees its buckets.
    match self
      .store
      .finish_step(run_id, index, StepStatus::Running, &update, &manifest, progress, completed_at)
      .await?
    {
      StepFinish::Stale => {
        warn!(tool = %input.tool_slug, "step was finalized elsewhere, result discarded");
        return Ok(());
      }
      StepFinish::RunTerminal => {
        debug!(run_status = run.status.as_str(), "run is terminal, manifest left unchanged");
      }
      StepFinish::Recorded => {}
    }

    if result.is_ok() {
      info!(
        tool = %input.tool_slug,
        added = merged.total_added(),
        duplicates = merged.duplicates,
        duration_ms,
        progress,
        "step_completed"
      );
      self.publish(
        RunEventType::StepCompleted,
        run_id,
        json!({
          "step_index": unit.step_index,
          "tool": input.tool_slug,
          "added": merged.added,
          "progress": progress,
        }),
      );
    } else {
      let reason = result.error_reason.unwrap_or(FailureReason::AdapterError);
      warn!(
        tool = %input.tool_slug,
        reason = %reason,
        message = %message,
        duration_ms,
        "step_failed"
      );
      self.publish(
        RunEventType::StepFailed,
        run_id,
        json!({
          "step_index": unit.step_index,
          "tool": input.tool_slug,
          "error_reason": reason,
          "message": message,
        }),
      );
    }

    self.advance(run_id).await
  }

  /// Validate, look up and run the adapter. Never fails: every problem is an
  /// error result.
  async fn invoke(&self, policy: &ToolPolicy, options: AdapterOptions) -> AdapterResult {
    let slug = options.tool_slug.clone();

    if !policy.enabled {
      return AdapterResult::error(
        FailureReason::InvalidParams,
        format!("tool '{slug}' is unknown or disabled"),
      );
    }
    let missing = policy.missing_required(&options.params);
    if !missing.is_empty() {
      return AdapterResult::error(
        FailureReason::InvalidParams,
        format!("missing required parameters: {}", missing.join(", ")),
      );
    }
    if !policy.consumes.is_empty() && options.target_count() == 0 {
      return AdapterResult::error(FailureReason::InvalidParams, "no targets for a tool that consumes input");
    }
    let Some(adapter) = self.adapters.get(&slug) else {
      return AdapterResult::error(
        FailureReason::NotInstalled,
        format!("no adapter registered for '{slug}'"),
      );
    };

    let timeout = policy.timeout();
    let guarded = AssertUnwindSafe(adapter.run(options)).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
      Err(_) => AdapterResult::error(
        FailureReason::Timeout,
        format!("{slug} exceeded {}s", timeout.as_secs()),
      ),
      Ok(Err(panic)) => {
        let detail = panic
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| panic.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "unknown panic".to_string());
        error!(tool = %slug, panic = %detail, "adapter panicked");
        AdapterResult::error(FailureReason::AdapterCrash, format!("adapter crashed: {detail}"))
      }
      Ok(Ok(Err(e))) => AdapterResult::error(FailureReason::AdapterCrash, format!("adapter crashed: {e}")),
      Ok(Ok(Ok(result))) => result,
    }
  }

  /// Copy the adapter's output file into artifact storage. Returns the key.
  async fn stage_artifact(&self, options: &AdapterOptions, result: &AdapterResult) -> Option<String> {
    let path = result.output_file.as_ref()?;
    let file_name = path.file_name()?.to_string_lossy().to_string();

    let size = match tokio::fs::metadata(path).await {
      Ok(meta) => meta.len(),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "output file not readable, not staged");
        return None;
      }
    };
    if size > options.policy.max_file_bytes {
      warn!(
        path = %path.display(),
        size,
        max_file_bytes = options.policy.max_file_bytes,
        "output file exceeds size cap, not staged"
      );
      return None;
    }

    let key = staging_key(&options.run_id, options.step_index, &options.tool_slug, &file_name);
    let staged = match file_stream(path).await {
      Ok(stream) => self.artifacts.put(&key, stream, "application/octet-stream").await,
      Err(e) => Err(e),
    };
    match staged {
      Ok(()) => Some(key),
      Err(e) => {
        warn!(key = %key, error = %e, "failed to stage artifact");
        None
      }
    }
  }
}
