use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error("workflow error: {0}")]
  Workflow(#[from] reconflow_workflow::WorkflowError),

  #[error("policy error: {0}")]
  Policy(#[from] reconflow_policy::PolicyError),

  #[error("store error: {0}")]
  Store(#[from] reconflow_store::Error),

  #[error("counter error: {0}")]
  Counter(#[from] reconflow_kv::Error),

  #[error("artifact error: {0}")]
  Artifact(#[from] reconflow_artifact::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("work queue '{queue}' is closed")]
  QueueClosed { queue: String },

  #[error("step {run_id}/{step_index} has no dispatch options")]
  MissingOptions { run_id: String, step_index: usize },
}
