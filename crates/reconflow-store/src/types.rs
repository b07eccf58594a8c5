use chrono::{DateTime, Utc};
use reconflow_manifest::RunManifest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
  Queued,
  Running,
  Paused,
  Completed,
  Failed,
  Canceled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled
    )
  }

  /// Whether a run in this status holds an admission slot.
  pub fn holds_slot(self) -> bool {
    matches!(self, RunStatus::Running | RunStatus::Paused)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      RunStatus::Queued => "queued",
      RunStatus::Running => "running",
      RunStatus::Paused => "paused",
      RunStatus::Completed => "completed",
      RunStatus::Failed => "failed",
      RunStatus::Canceled => "canceled",
    }
  }
}

/// Status of a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
  Queued,
  Running,
  Completed,
  Failed,
  Skipped,
  Canceled,
}

impl StepStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, StepStatus::Queued | StepStatus::Running)
  }

  /// Completed and skipped steps both count towards run progress.
  pub fn counts_as_progress(self) -> bool {
    matches!(self, StepStatus::Completed | StepStatus::Skipped)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      StepStatus::Queued => "queued",
      StepStatus::Running => "running",
      StepStatus::Completed => "completed",
      StepStatus::Failed => "failed",
      StepStatus::Skipped => "skipped",
      StepStatus::Canceled => "canceled",
    }
  }
}

/// A workflow run as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRun {
  pub run_id: String,
  pub workflow_id: String,
  pub user_id: String,
  pub status: RunStatus,
  /// Fixed at creation.
  pub total_steps: i64,
  pub progress: f64,
  pub manifest: Json<RunManifest>,
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// One node's execution instance within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunStep {
  pub run_id: String,
  pub step_index: i64,
  pub node_id: String,
  pub tool_slug: String,
  pub status: StepStatus,
  /// Policy snapshot, node config and, once dispatched, the adapter options.
  pub input_manifest: Json<Value>,
  pub output_manifest: Option<Json<Value>>,
  pub task_handle: Option<String>,
  pub history_id: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
}

/// Audit record of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScanHistory {
  pub history_id: String,
  pub run_id: String,
  pub step_index: i64,
  pub tool_slug: String,
  pub params: Json<Value>,
  pub success: bool,
  pub failure_reason: Option<String>,
  pub message: Option<String>,
  /// Tail of the adapter's raw output.
  pub raw_output: String,
  pub duration_ms: i64,
  pub started_at: DateTime<Utc>,
  pub completed_at: DateTime<Utc>,
}

/// Fields written when a step changes status.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
  pub status: StepStatus,
  pub output_manifest: Option<Value>,
  pub history_id: Option<String>,
}

impl StepUpdate {
  pub fn new(status: StepStatus) -> Self {
    Self {
      status,
      output_manifest: None,
      history_id: None,
    }
  }

  pub fn with_output(mut self, output: Value) -> Self {
    self.output_manifest = Some(output);
    self
  }

  pub fn with_history(mut self, history_id: impl Into<String>) -> Self {
    self.history_id = Some(history_id.into());
    self
  }
}

/// What [`crate::Store::finish_step`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFinish {
  /// The step was not in the expected status. Nothing was written.
  Stale,
  /// The step and the run's manifest and progress were written together.
  Recorded,
  /// The step was written. The run is terminal, so its manifest was kept.
  RunTerminal,
}
