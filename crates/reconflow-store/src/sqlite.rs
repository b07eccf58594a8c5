use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconflow_manifest::RunManifest;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;

use crate::{
  Error, RunStatus, ScanHistory, SqliteCounterStore, StepFinish, StepStatus, StepUpdate, Store, WorkflowRun,
  WorkflowRunStep,
};

const RUN_COLUMNS: &str = "run_id, workflow_id, user_id, status, total_steps, progress, manifest, error, \
   created_at, updated_at, started_at, completed_at";

const STEP_COLUMNS: &str = "run_id, step_index, node_id, tool_slug, status, input_manifest, output_manifest, \
   task_handle, history_id, started_at, completed_at, updated_at";

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .foreign_keys(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
      .max_connections(5)
      .connect_with(options)
      .await?;
    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  /// Admission counters kept in the same database, shared by every process
  /// pointed at it.
  pub fn counters(&self) -> SqliteCounterStore {
    SqliteCounterStore::new(self.pool.clone())
  }
}

async fn write_step(
  conn: &mut SqliteConnection,
  run_id: &str,
  step_index: i64,
  expected: StepStatus,
  update: &StepUpdate,
  at: DateTime<Utc>,
) -> Result<bool, Error> {
  let completed_at = update.status.is_terminal().then_some(at);

  let result = sqlx::query(
    r#"
            UPDATE workflow_run_steps
            SET status = ?, output_manifest = COALESCE(?, output_manifest),
                history_id = COALESCE(?, history_id),
                completed_at = COALESCE(?, completed_at), updated_at = ?
            WHERE run_id = ? AND step_index = ? AND status = ?
            "#,
  )
  .bind(update.status)
  .bind(update.output_manifest.as_ref().map(Json))
  .bind(&update.history_id)
  .bind(completed_at)
  .bind(at)
  .bind(run_id)
  .bind(step_index)
  .bind(expected)
  .execute(conn)
  .await?;

  Ok(result.rows_affected() > 0)
}

async fn write_progress(
  conn: &mut SqliteConnection,
  run_id: &str,
  manifest: &RunManifest,
  progress: f64,
  at: DateTime<Utc>,
) -> Result<bool, Error> {
  let result = sqlx::query(
    r#"
            UPDATE workflow_runs
            SET manifest = ?, progress = ?, updated_at = ?
            WHERE run_id = ? AND status IN (?, ?)
            "#,
  )
  .bind(Json(manifest))
  .bind(progress)
  .bind(at)
  .bind(run_id)
  .bind(RunStatus::Running)
  .bind(RunStatus::Paused)
  .execute(conn)
  .await?;

  Ok(result.rows_affected() > 0)
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_run(&self, run: &WorkflowRun, steps: &[WorkflowRunStep]) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
            INSERT INTO workflow_runs (run_id, workflow_id, user_id, status, total_steps, progress, manifest,
                                       error, created_at, updated_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&run.run_id)
    .bind(&run.workflow_id)
    .bind(&run.user_id)
    .bind(run.status)
    .bind(run.total_steps)
    .bind(run.progress)
    .bind(&run.manifest)
    .bind(&run.error)
    .bind(run.created_at)
    .bind(run.updated_at)
    .bind(run.started_at)
    .bind(run.completed_at)
    .execute(&mut *tx)
    .await?;

    for step in steps {
      sqlx::query(
        r#"
            INSERT INTO workflow_run_steps (run_id, step_index, node_id, tool_slug, status, input_manifest,
                                            output_manifest, task_handle, history_id, started_at, completed_at,
                                            updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
      )
      .bind(&step.run_id)
      .bind(step.step_index)
      .bind(&step.node_id)
      .bind(&step.tool_slug)
      .bind(step.status)
      .bind(&step.input_manifest)
      .bind(&step.output_manifest)
      .bind(&step.task_handle)
      .bind(&step.history_id)
      .bind(step.started_at)
      .bind(step.completed_at)
      .bind(step.updated_at)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, Error> {
    sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE run_id = ?"))
      .bind(run_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
  }

  async fn list_runs_by_status(&self, status: RunStatus, limit: u32) -> Result<Vec<WorkflowRun>, Error> {
    let runs = sqlx::query_as(&format!(
      "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE status = ? ORDER BY created_at ASC, run_id ASC LIMIT ?"
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;
    Ok(runs)
  }

  async fn list_stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error> {
    let runs = sqlx::query_as(&format!(
      "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE status = ? AND updated_at < ? ORDER BY updated_at ASC"
    ))
    .bind(RunStatus::Running)
    .bind(cutoff)
    .fetch_all(&self.pool)
    .await?;
    Ok(runs)
  }

  async fn list_expired_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error> {
    let runs = sqlx::query_as(&format!(
      "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE status IN (?, ?, ?) AND created_at < ? ORDER BY created_at ASC"
    ))
    .bind(RunStatus::Completed)
    .bind(RunStatus::Failed)
    .bind(RunStatus::Canceled)
    .bind(cutoff)
    .fetch_all(&self.pool)
    .await?;
    Ok(runs)
  }

  async fn transition_run(
    &self,
    run_id: &str,
    from: RunStatus,
    to: RunStatus,
    error: Option<&str>,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let started_at = (to == RunStatus::Running).then_some(at);
    let completed_at = to.is_terminal().then_some(at);
    let progress = (to == RunStatus::Completed).then_some(100.0_f64);

    let result = sqlx::query(
      r#"
            UPDATE workflow_runs
            SET status = ?, error = COALESCE(?, error), updated_at = ?,
                started_at = COALESCE(started_at, ?), completed_at = COALESCE(?, completed_at),
                progress = COALESCE(?, progress)
            WHERE run_id = ? AND status = ?
            "#,
    )
    .bind(to)
    .bind(error)
    .bind(at)
    .bind(started_at)
    .bind(completed_at)
    .bind(progress)
    .bind(run_id)
    .bind(from)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn save_run_progress(
    &self,
    run_id: &str,
    manifest: &RunManifest,
    progress: f64,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let mut conn = self.pool.acquire().await?;
    write_progress(&mut conn, run_id, manifest, progress, at).await
  }

  async fn delete_run(&self, run_id: &str) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("DELETE FROM scan_history WHERE run_id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM workflow_run_steps WHERE run_id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM workflow_runs WHERE run_id = ?")
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(())
  }

  async fn list_steps(&self, run_id: &str) -> Result<Vec<WorkflowRunStep>, Error> {
    let steps = sqlx::query_as(&format!(
      "SELECT {STEP_COLUMNS} FROM workflow_run_steps WHERE run_id = ? ORDER BY step_index ASC"
    ))
    .bind(run_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(steps)
  }

  async fn get_step(&self, run_id: &str, step_index: i64) -> Result<WorkflowRunStep, Error> {
    sqlx::query_as(&format!(
      "SELECT {STEP_COLUMNS} FROM workflow_run_steps WHERE run_id = ? AND step_index = ?"
    ))
    .bind(run_id)
    .bind(step_index)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("step {run_id}/{step_index}")))
  }

  async fn claim_step(
    &self,
    run_id: &str,
    step_index: i64,
    task_handle: &str,
    input_manifest: &Value,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let mut tx = self.pool.begin().await?;
    let result = sqlx::query(
      r#"
            UPDATE workflow_run_steps
            SET status = ?, task_handle = ?, input_manifest = ?,
                started_at = COALESCE(started_at, ?), updated_at = ?
            WHERE run_id = ? AND step_index = ? AND status = ?
              AND task_handle IS NULL
              AND NOT EXISTS (
                SELECT 1 FROM workflow_run_steps AS other
                WHERE other.run_id = ? AND other.status = ?
              )
            "#,
    )
    .bind(StepStatus::Running)
    .bind(task_handle)
    .bind(Json(input_manifest))
    .bind(at)
    .bind(at)
    .bind(run_id)
    .bind(step_index)
    .bind(StepStatus::Queued)
    .bind(run_id)
    .bind(StepStatus::Running)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
      tx.rollback().await?;
      return Ok(false);
    }

    sqlx::query("UPDATE workflow_runs SET updated_at = ? WHERE run_id = ?")
      .bind(at)
      .bind(run_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(true)
  }

  async fn update_step(
    &self,
    run_id: &str,
    step_index: i64,
    expected: StepStatus,
    update: &StepUpdate,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let mut conn = self.pool.acquire().await?;
    write_step(&mut conn, run_id, step_index, expected, update, at).await
  }

  async fn finish_step(
    &self,
    run_id: &str,
    step_index: i64,
    expected: StepStatus,
    update: &StepUpdate,
    manifest: &RunManifest,
    progress: f64,
    at: DateTime<Utc>,
  ) -> Result<StepFinish, Error> {
    let mut tx = self.pool.begin().await?;
    if !write_step(&mut tx, run_id, step_index, expected, update, at).await? {
      tx.rollback().await?;
      return Ok(StepFinish::Stale);
    }
    let recorded = write_progress(&mut tx, run_id, manifest, progress, at).await?;
    tx.commit().await?;

    Ok(if recorded { StepFinish::Recorded } else { StepFinish::RunTerminal })
  }

  async fn cancel_queued_steps(&self, run_id: &str, at: DateTime<Utc>) -> Result<u64, Error> {
    let result = sqlx::query(
      r#"
            UPDATE workflow_run_steps
            SET status = ?, completed_at = ?, updated_at = ?
            WHERE run_id = ? AND status = ?
            "#,
    )
    .bind(StepStatus::Canceled)
    .bind(at)
    .bind(at)
    .bind(run_id)
    .bind(StepStatus::Queued)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }

  async fn create_history(&self, history: &ScanHistory) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO scan_history (history_id, run_id, step_index, tool_slug, params, success, failure_reason,
                                      message, raw_output, duration_ms, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&history.history_id)
    .bind(&history.run_id)
    .bind(history.step_index)
    .bind(&history.tool_slug)
    .bind(&history.params)
    .bind(history.success)
    .bind(&history.failure_reason)
    .bind(&history.message)
    .bind(&history.raw_output)
    .bind(history.duration_ms)
    .bind(history.started_at)
    .bind(history.completed_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_history(&self, run_id: &str) -> Result<Vec<ScanHistory>, Error> {
    let history = sqlx::query_as(
      r#"
            SELECT history_id, run_id, step_index, tool_slug, params, success, failure_reason, message,
                   raw_output, duration_ms, started_at, completed_at
            FROM scan_history
            WHERE run_id = ?
            ORDER BY step_index ASC, started_at ASC
            "#,
    )
    .bind(run_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(history)
  }
}
