//! Typed views of a step's input and output manifests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use reconflow_adapter::{AdapterOptions, FailureReason};
use reconflow_config::NodeConfig;
use reconflow_manifest::BucketKind;
use reconflow_policy::ToolPolicy;
use reconflow_store::{StepStatus, WorkflowRunStep};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrchestratorError;

/// What a step was created with, plus its dispatch options once claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
  pub node_id: String,
  pub tool_slug: String,
  /// Immutable policy snapshot taken when the run was built.
  pub policy: ToolPolicy,
  #[serde(default)]
  pub config: NodeConfig,
  /// Explicit upstream step indices.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input_from: Option<Vec<usize>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<AdapterOptions>,
}

impl StepInput {
  pub fn from_step(step: &WorkflowRunStep) -> Result<Self, OrchestratorError> {
    Ok(serde_json::from_value(step.input_manifest.0.clone())?)
  }

  pub fn to_value(&self) -> Result<Value, OrchestratorError> {
    Ok(serde_json::to_value(self)?)
  }
}

/// Summary of a finished step, stored as its output manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
  pub status: Option<StepStatus>,
  #[serde(default)]
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_reason: Option<FailureReason>,
  #[serde(default)]
  pub buckets: BTreeMap<BucketKind, Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_file: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifact: Option<String>,
  #[serde(default)]
  pub added: BTreeMap<BucketKind, usize>,
  #[serde(default)]
  pub duplicates: usize,
}

impl StepOutput {
  pub fn new(status: StepStatus, message: impl Into<String>) -> Self {
    Self {
      status: Some(status),
      message: message.into(),
      ..Default::default()
    }
  }

  pub fn with_reason(mut self, reason: FailureReason) -> Self {
    self.error_reason = Some(reason);
    self
  }

  /// Output of a step, if it has finished.
  pub fn from_step(step: &WorkflowRunStep) -> Option<Self> {
    let output = step.output_manifest.as_ref()?;
    serde_json::from_value(output.0.clone()).ok()
  }

  pub fn to_value(&self) -> Result<Value, OrchestratorError> {
    Ok(serde_json::to_value(self)?)
  }
}
