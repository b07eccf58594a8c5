use std::collections::BTreeMap;
use std::path::PathBuf;

use reconflow_manifest::BucketKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reason::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
  Ok,
  Error,
}

/// Execution diagnostics reported by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub command: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exit_code: Option<i32>,
  /// Combined raw output; the engine keeps only its tail.
  #[serde(default)]
  pub raw_output: String,
}

/// The outcome of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
  pub status: AdapterStatus,
  pub message: String,
  #[serde(default)]
  pub buckets: BTreeMap<BucketKind, Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_file: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_reason: Option<FailureReason>,
  #[serde(default)]
  pub diagnostics: Diagnostics,
}

impl AdapterResult {
  pub fn ok(message: impl Into<String>) -> Self {
    Self {
      status: AdapterStatus::Ok,
      message: message.into(),
      buckets: BTreeMap::new(),
      output_file: None,
      error_reason: None,
      diagnostics: Diagnostics::default(),
    }
  }

  pub fn error(reason: FailureReason, message: impl Into<String>) -> Self {
    Self {
      status: AdapterStatus::Error,
      message: message.into(),
      buckets: BTreeMap::new(),
      output_file: None,
      error_reason: Some(reason),
      diagnostics: Diagnostics::default(),
    }
  }

  pub fn with_bucket(mut self, kind: BucketKind, items: Vec<Value>) -> Self {
    self.buckets.entry(kind).or_default().extend(items);
    self
  }

  pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.output_file = Some(path.into());
    self
  }

  pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
    self.diagnostics.raw_output = raw_output.into();
    self
  }

  pub fn is_ok(&self) -> bool {
    self.status == AdapterStatus::Ok
  }
}
