//! Input composition for a step.
//!
//! Inputs are drawn from three sources, in order:
//! 1. The outputs of the step's upstream steps, restricted to the buckets the
//!    step consumes
//! 2. Locally configured values (manual input and a server-side file),
//!    bucketized by shape
//! 3. The run's global seeds, only when the first two yield nothing
//!
//! The result is normalized, deduplicated in stable order and capped per
//! bucket at the policy's max-target count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reconflow_adapter::AdapterOptions;
use reconflow_manifest::{BucketKind, RunManifest, bucketize, normalize_items};
use reconflow_store::{StepStatus, WorkflowRunStep};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::step::{StepInput, StepOutput};

pub struct InputComposer {
  scratch_root: PathBuf,
}

impl InputComposer {
  pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
    Self {
      scratch_root: scratch_root.into(),
    }
  }

  pub fn scratch_root(&self) -> &Path {
    &self.scratch_root
  }

  /// Scratch directory of a run.
  pub fn run_scratch_dir(&self, run_id: &str) -> PathBuf {
    self.scratch_root.join(run_id)
  }

  /// Per-step working directory: `<scratch>/<run_id>/<NNN>_<tool>`.
  pub fn step_scratch_dir(&self, run_id: &str, step_index: usize, tool_slug: &str) -> PathBuf {
    self
      .run_scratch_dir(run_id)
      .join(format!("{step_index:03}_{tool_slug}"))
  }

  /// Upstream step indices: explicit `input_from`, else the nearest
  /// preceding step that was not skipped.
  pub fn upstream(steps: &[WorkflowRunStep], step_index: usize, input: &StepInput) -> Vec<usize> {
    if let Some(explicit) = &input.input_from {
      return explicit.clone();
    }
    steps
      .iter()
      .filter(|s| (s.step_index as usize) < step_index && s.status != StepStatus::Skipped)
      .map(|s| s.step_index as usize)
      .max()
      .into_iter()
      .collect()
  }

  /// Build the options the adapter for `step_index` receives.
  pub async fn compose(
    &self,
    run_id: &str,
    manifest: &RunManifest,
    steps: &[WorkflowRunStep],
    step_index: usize,
    input: &StepInput,
  ) -> Result<AdapterOptions, OrchestratorError> {
    let policy = &input.policy;
    let mut collected: BTreeMap<BucketKind, Vec<Value>> = BTreeMap::new();

    for upstream in Self::upstream(steps, step_index, input) {
      let Some(output) = steps
        .iter()
        .find(|s| s.step_index as usize == upstream)
        .and_then(StepOutput::from_step)
      else {
        continue;
      };
      for kind in &policy.consumes {
        if let Some(items) = output.buckets.get(kind) {
          collected.entry(*kind).or_default().extend(items.iter().cloned());
        }
      }
    }

    for text in self.local_inputs(input).await? {
      for (kind, values) in bucketize(&text, &policy.consumes) {
        collected
          .entry(kind)
          .or_default()
          .extend(values.into_iter().map(Value::String));
      }
    }

    if collected.values().all(Vec::is_empty) {
      for kind in &policy.consumes {
        let seeds = manifest.seeds(*kind);
        if !seeds.is_empty() {
          collected.insert(*kind, seeds.to_vec());
        }
      }
    }

    let mut inputs = BTreeMap::new();
    for (kind, items) in collected {
      let mut normalized = normalize_items(kind, &items);
      if normalized.len() > policy.max_targets {
        debug!(
          run_id = %run_id,
          step_index,
          bucket = %kind,
          dropped = normalized.len() - policy.max_targets,
          "capping step inputs"
        );
        normalized.truncate(policy.max_targets);
      }
      if !normalized.is_empty() {
        inputs.insert(kind, normalized);
      }
    }

    let scratch_dir = self.step_scratch_dir(run_id, step_index, &input.tool_slug);
    tokio::fs::create_dir_all(&scratch_dir).await?;

    Ok(AdapterOptions {
      run_id: run_id.to_string(),
      step_index,
      tool_slug: input.tool_slug.clone(),
      policy: policy.clone(),
      params: policy.apply_runtime(&input.config.params),
      inputs,
      scratch_dir,
    })
  }

  /// Whether the node carries input of its own: non-blank manual text, or a
  /// readable, non-empty server file within the size cap.
  pub async fn has_local_input(&self, input: &StepInput) -> bool {
    if input
      .config
      .manual_input
      .as_deref()
      .is_some_and(|text| !text.trim().is_empty())
    {
      return true;
    }
    let Some(path) = &input.config.server_file else {
      return false;
    };
    match tokio::fs::metadata(path).await {
      Ok(meta) => meta.is_file() && meta.len() > 0 && meta.len() <= input.policy.max_file_bytes,
      Err(e) => {
        debug!(tool = %input.tool_slug, path = %path.display(), error = %e, "server file not readable");
        false
      }
    }
  }

  /// Manual input text and server-file contents, when configured.
  async fn local_inputs(&self, input: &StepInput) -> Result<Vec<String>, OrchestratorError> {
    let mut texts = Vec::new();

    if let Some(manual) = &input.config.manual_input
      && !manual.trim().is_empty()
    {
      texts.push(manual.clone());
    }

    if let Some(path) = &input.config.server_file {
      let size = tokio::fs::metadata(path).await?.len();
      if size > input.policy.max_file_bytes {
        warn!(
          tool = %input.tool_slug,
          path = %path.display(),
          size,
          max_file_bytes = input.policy.max_file_bytes,
          "server file exceeds size cap, ignored"
        );
      } else {
        texts.push(tokio::fs::read_to_string(path).await?);
      }
    }

    Ok(texts)
  }
}
