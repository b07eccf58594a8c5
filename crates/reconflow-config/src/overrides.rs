//! Catalog override rows for tool policies.
//!
//! Overrides are applied on top of the built-in baseline for a tool and may
//! only narrow it: numeric bounds are clamped into the baseline range, choice
//! lists are intersected with the baseline choices, and caps take the minimum.

use std::collections::BTreeMap;

use reconflow_manifest::BucketKind;
use serde::{Deserialize, Serialize};

/// Override row for a single tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOverride {
  /// Disabled tools resolve to an empty policy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_targets: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_file_bytes: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,
  /// Replaces the baseline binary candidates when non-empty.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub binary_candidates: Vec<String>,
  /// Restricts the accepted input buckets to a subset of the baseline.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub consumes: Option<Vec<BucketKind>>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub runtime: BTreeMap<String, BoundOverride>,
}

/// Override for a single runtime parameter's bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundOverride {
  Numeric {
    #[serde(default)]
    min: Option<i64>,
    #[serde(default)]
    max: Option<i64>,
    #[serde(default)]
    default: Option<i64>,
  },
  Choice {
    options: Vec<String>,
    #[serde(default)]
    default: Option<String>,
  },
}
