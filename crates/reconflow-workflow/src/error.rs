use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow has no nodes")]
  Empty,

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("no entry points found (all nodes have incoming edges)")]
  NoEntryPoints,

  #[error("workflow is not a linear chain: {reason}")]
  NonLinear { reason: String },

  #[error("node '{node_id}' reads from '{upstream}', which is not an earlier node")]
  InvalidUpstream { node_id: String, upstream: String },
}
