use std::collections::BTreeMap;
use std::path::PathBuf;

use reconflow_manifest::BucketKind;
use reconflow_policy::ToolPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything an adapter receives for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOptions {
  pub run_id: String,
  pub step_index: usize,
  pub tool_slug: String,
  /// Policy snapshot taken when the run was built.
  pub policy: ToolPolicy,
  /// Runtime parameters after defaults and clamping.
  #[serde(default)]
  pub params: Map<String, Value>,
  /// Normalized, deduplicated and capped input items per bucket.
  #[serde(default)]
  pub inputs: BTreeMap<BucketKind, Vec<Value>>,
  /// Per-step working directory.
  pub scratch_dir: PathBuf,
}

impl AdapterOptions {
  /// Input items of one bucket.
  pub fn input(&self, kind: BucketKind) -> &[Value] {
    self.inputs.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// Total number of input items across buckets.
  pub fn target_count(&self) -> usize {
    self.inputs.values().map(Vec::len).sum()
  }

  /// All input items rendered as plain strings, in consumed-bucket order.
  pub fn target_lines(&self) -> Vec<String> {
    let mut lines = Vec::with_capacity(self.target_count());
    for kind in &self.policy.consumes {
      for item in self.input(*kind) {
        match item {
          Value::String(s) => lines.push(s.clone()),
          other => lines.push(other.to_string()),
        }
      }
    }
    lines
  }
}
