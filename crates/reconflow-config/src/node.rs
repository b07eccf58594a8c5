use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A node in a workflow definition, bound to a tool by slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  /// Tool slug, e.g. "subfinder".
  pub tool: String,
  /// Explicit position, used when edges do not define an order.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<u32>,
  #[serde(default)]
  pub config: NodeConfig,
}

/// Static per-node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
  /// Runtime parameters, validated against the tool's policy bounds.
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,
  /// Manually supplied targets (newline, comma or whitespace separated).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manual_input: Option<String>,
  /// Server-side file of targets.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub server_file: Option<PathBuf>,
  /// Explicit upstream node ids. Defaults to the preceding step.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input_from: Option<Vec<String>>,
}
