//! Reconflow Store
//!
//! This crate provides the storage trait and implementations for workflow
//! runs, their steps, and scan-history audit records.
//!
//! The [`Store`] trait defines operations for:
//! - Creating a run together with all of its steps, atomically
//! - Compare-and-swap status transitions for runs and steps
//! - Querying runs for promotion, reconciliation and pruning
//! - Shared admission counters ([`SqliteCounterStore`])
//!
//! Status transitions are guarded by the expected current status so that
//! concurrent coordinator invocations cannot move a row backwards.

mod counters;
mod memory;
mod sqlite;
#[cfg(test)]
mod testing;
mod types;

pub use counters::SqliteCounterStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use sqlx::types::Json;
pub use types::{RunStatus, ScanHistory, StepFinish, StepStatus, StepUpdate, WorkflowRun, WorkflowRunStep};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconflow_manifest::RunManifest;
use serde_json::Value;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for workflow runs, steps and scan history.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a run and all of its steps in one transaction.
  async fn create_run(&self, run: &WorkflowRun, steps: &[WorkflowRunStep]) -> Result<(), Error>;

  /// Get a run by ID.
  async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, Error>;

  /// Runs in a status, oldest first.
  async fn list_runs_by_status(&self, status: RunStatus, limit: u32) -> Result<Vec<WorkflowRun>, Error>;

  /// Running runs whose last update is older than `cutoff`.
  async fn list_stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error>;

  /// Terminal runs created before `cutoff`.
  async fn list_expired_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error>;

  /// Move a run from `from` to `to`. Returns false when the run was not in
  /// `from`. Sets `started_at` on first entry into RUNNING, `completed_at` on
  /// terminal statuses, and progress to 100 on COMPLETED.
  async fn transition_run(
    &self,
    run_id: &str,
    from: RunStatus,
    to: RunStatus,
    error: Option<&str>,
    at: DateTime<Utc>,
  ) -> Result<bool, Error>;

  /// Persist the manifest and progress of a non-terminal run. Returns false
  /// when the run is already terminal.
  async fn save_run_progress(
    &self,
    run_id: &str,
    manifest: &RunManifest,
    progress: f64,
    at: DateTime<Utc>,
  ) -> Result<bool, Error>;

  /// Delete a run with its steps and history.
  async fn delete_run(&self, run_id: &str) -> Result<(), Error>;

  /// Steps of a run, in index order.
  async fn list_steps(&self, run_id: &str) -> Result<Vec<WorkflowRunStep>, Error>;

  /// Get a single step.
  async fn get_step(&self, run_id: &str, step_index: i64) -> Result<WorkflowRunStep, Error>;

  /// Claim a QUEUED step for a worker: move it to RUNNING, record the task
  /// handle and dispatch options, and touch the run's `updated_at`. Fails
  /// (returns false) when the step is not QUEUED or another step of the run
  /// is already RUNNING.
  async fn claim_step(
    &self,
    run_id: &str,
    step_index: i64,
    task_handle: &str,
    input_manifest: &Value,
    at: DateTime<Utc>,
  ) -> Result<bool, Error>;

  /// Apply `update` to a step currently in `expected`. Returns false when the
  /// step is in another status.
  async fn update_step(
    &self,
    run_id: &str,
    step_index: i64,
    expected: StepStatus,
    update: &StepUpdate,
    at: DateTime<Utc>,
  ) -> Result<bool, Error>;

  /// Apply `update` to a step in `expected` and, in the same transaction,
  /// save the run's manifest and progress unless the run is terminal.
  #[allow(clippy::too_many_arguments)]
  async fn finish_step(
    &self,
    run_id: &str,
    step_index: i64,
    expected: StepStatus,
    update: &StepUpdate,
    manifest: &RunManifest,
    progress: f64,
    at: DateTime<Utc>,
  ) -> Result<StepFinish, Error>;

  /// Mark every QUEUED step of a run as CANCELED. Returns the count.
  async fn cancel_queued_steps(&self, run_id: &str, at: DateTime<Utc>) -> Result<u64, Error>;

  /// Record an adapter invocation.
  async fn create_history(&self, history: &ScanHistory) -> Result<(), Error>;

  /// History records of a run, in step order.
  async fn list_history(&self, run_id: &str) -> Result<Vec<ScanHistory>, Error>;
}
