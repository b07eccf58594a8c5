use chrono::{DateTime, Utc};
use reconflow_manifest::RunManifest;
use serde_json::json;
use sqlx::types::Json;

use crate::{RunStatus, StepStatus, WorkflowRun, WorkflowRunStep};

pub fn run_row(run_id: &str, user_id: &str, total_steps: i64, created_at: DateTime<Utc>) -> WorkflowRun {
  WorkflowRun {
    run_id: run_id.to_string(),
    workflow_id: "wf-1".to_string(),
    user_id: user_id.to_string(),
    status: RunStatus::Queued,
    total_steps,
    progress: 0.0,
    manifest: Json(RunManifest::new()),
    error: None,
    created_at,
    updated_at: created_at,
    started_at: None,
    completed_at: None,
  }
}

pub fn step_row(run_id: &str, step_index: i64, tool_slug: &str) -> WorkflowRunStep {
  WorkflowRunStep {
    run_id: run_id.to_string(),
    step_index,
    node_id: format!("node-{step_index}"),
    tool_slug: tool_slug.to_string(),
    status: StepStatus::Queued,
    input_manifest: Json(json!({ "policy": { "slug": tool_slug } })),
    output_manifest: None,
    task_handle: None,
    history_id: None,
    started_at: None,
    completed_at: None,
    updated_at: Utc::now(),
  }
}
