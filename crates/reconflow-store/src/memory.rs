use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconflow_manifest::RunManifest;
use serde_json::Value;
use sqlx::types::Json;

use crate::{Error, RunStatus, ScanHistory, StepFinish, StepStatus, StepUpdate, Store, WorkflowRun, WorkflowRunStep};

#[derive(Default)]
struct State {
  runs: BTreeMap<String, WorkflowRun>,
  steps: BTreeMap<(String, i64), WorkflowRunStep>,
  history: Vec<ScanHistory>,
}

/// In-memory store with the same semantics as [`crate::SqliteStore`].
///
/// Suitable for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<State>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

fn apply_update(step: &mut WorkflowRunStep, update: &StepUpdate, at: DateTime<Utc>) {
  step.status = update.status;
  if let Some(output) = &update.output_manifest {
    step.output_manifest = Some(Json(output.clone()));
  }
  if let Some(history_id) = &update.history_id {
    step.history_id = Some(history_id.clone());
  }
  if update.status.is_terminal() {
    step.completed_at = Some(at);
  }
  step.updated_at = at;
}

fn sorted_runs<'a>(runs: impl Iterator<Item = &'a WorkflowRun>, key: fn(&WorkflowRun) -> DateTime<Utc>) -> Vec<WorkflowRun> {
  let mut out: Vec<WorkflowRun> = runs.cloned().collect();
  out.sort_by(|a, b| key(a).cmp(&key(b)).then_with(|| a.run_id.cmp(&b.run_id)));
  out
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_run(&self, run: &WorkflowRun, steps: &[WorkflowRunStep]) -> Result<(), Error> {
    let mut state = self.lock();
    if state.runs.contains_key(&run.run_id) {
      return Err(Error::Database(sqlx::Error::Protocol(format!(
        "duplicate run {}",
        run.run_id
      ))));
    }

    let mut staged = BTreeMap::new();
    for step in steps {
      let key = (step.run_id.clone(), step.step_index);
      if staged.insert(key, step.clone()).is_some() {
        return Err(Error::Database(sqlx::Error::Protocol(format!(
          "duplicate step {}/{}",
          step.run_id, step.step_index
        ))));
      }
    }

    state.runs.insert(run.run_id.clone(), run.clone());
    state.steps.extend(staged);
    Ok(())
  }

  async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, Error> {
    self
      .lock()
      .runs
      .get(run_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
  }

  async fn list_runs_by_status(&self, status: RunStatus, limit: u32) -> Result<Vec<WorkflowRun>, Error> {
    let state = self.lock();
    let mut runs = sorted_runs(state.runs.values().filter(|r| r.status == status), |r| r.created_at);
    runs.truncate(limit as usize);
    Ok(runs)
  }

  async fn list_stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error> {
    let state = self.lock();
    Ok(sorted_runs(
      state
        .runs
        .values()
        .filter(|r| r.status == RunStatus::Running && r.updated_at < cutoff),
      |r| r.updated_at,
    ))
  }

  async fn list_expired_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error> {
    let state = self.lock();
    Ok(sorted_runs(
      state
        .runs
        .values()
        .filter(|r| r.status.is_terminal() && r.created_at < cutoff),
      |r| r.created_at,
    ))
  }

  async fn transition_run(
    &self,
    run_id: &str,
    from: RunStatus,
    to: RunStatus,
    error: Option<&str>,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let mut state = self.lock();
    let Some(run) = state.runs.get_mut(run_id) else {
      return Ok(false);
    };
    if run.status != from {
      return Ok(false);
    }

    run.status = to;
    run.updated_at = at;
    if let Some(error) = error {
      run.error = Some(error.to_string());
    }
    if to == RunStatus::Running && run.started_at.is_none() {
      run.started_at = Some(at);
    }
    if to.is_terminal() {
      run.completed_at = Some(at);
    }
    if to == RunStatus::Completed {
      run.progress = 100.0;
    }
    Ok(true)
  }

  async fn save_run_progress(
    &self,
    run_id: &str,
    manifest: &RunManifest,
    progress: f64,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let mut state = self.lock();
    match state.runs.get_mut(run_id) {
      Some(run) if matches!(run.status, RunStatus::Running | RunStatus::Paused) => {
        run.manifest = Json(manifest.clone());
        run.progress = progress;
        run.updated_at = at;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn delete_run(&self, run_id: &str) -> Result<(), Error> {
    let mut state = self.lock();
    state.runs.remove(run_id);
    state.steps.retain(|(id, _), _| id != run_id);
    state.history.retain(|h| h.run_id != run_id);
    Ok(())
  }

  async fn list_steps(&self, run_id: &str) -> Result<Vec<WorkflowRunStep>, Error> {
    let state = self.lock();
    Ok(
      state
        .steps
        .values()
        .filter(|s| s.run_id == run_id)
        .cloned()
        .collect(),
    )
  }

  async fn get_step(&self, run_id: &str, step_index: i64) -> Result<WorkflowRunStep, Error> {
    self
      .lock()
      .steps
      .get(&(run_id.to_string(), step_index))
      .cloned()
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
    let mut state = self.lock();
    let sibling_running = state
      .steps
      .values()
      .any(|s| s.run_id == run_id && s.status == StepStatus::Running);
    if sibling_running {
      return Ok(false);
    }

    match state.steps.get_mut(&(run_id.to_string(), step_index)) {
      Some(step) if step.status == StepStatus::Queued && step.task_handle.is_none() => {
        step.status = StepStatus::Running;
        step.task_handle = Some(task_handle.to_string());
        step.input_manifest = Json(input_manifest.clone());
        step.started_at.get_or_insert(at);
        step.updated_at = at;
      }
      _ => return Ok(false),
    }
    if let Some(run) = state.runs.get_mut(run_id) {
      run.updated_at = at;
    }
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
    let mut state = self.lock();
    match state.steps.get_mut(&(run_id.to_string(), step_index)) {
      Some(step) if step.status == expected => {
        apply_update(step, update, at);
        Ok(true)
      }
      _ => Ok(false),
    }
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
    let mut state = self.lock();
    match state.steps.get_mut(&(run_id.to_string(), step_index)) {
      Some(step) if step.status == expected => apply_update(step, update, at),
      _ => return Ok(StepFinish::Stale),
    }

    match state.runs.get_mut(run_id) {
      Some(run) if matches!(run.status, RunStatus::Running | RunStatus::Paused) => {
        run.manifest = Json(manifest.clone());
        run.progress = progress;
        run.updated_at = at;
        Ok(StepFinish::Recorded)
      }
      _ => Ok(StepFinish::RunTerminal),
    }
  }

  async fn cancel_queued_steps(&self, run_id: &str, at: DateTime<Utc>) -> Result<u64, Error> {
    let mut state = self.lock();
    let mut count = 0;
    for step in state
      .steps
      .values_mut()
      .filter(|s| s.run_id == run_id && s.status == StepStatus::Queued)
    {
      step.status = StepStatus::Canceled;
      step.completed_at = Some(at);
      step.updated_at = at;
      count += 1;
    }
    Ok(count)
  }

  async fn create_history(&self, history: &ScanHistory) -> Result<(), Error> {
    self.lock().history.push(history.clone());
    Ok(())
  }

  async fn list_history(&self, run_id: &str) -> Result<Vec<ScanHistory>, Error> {
    let state = self.lock();
    let mut history: Vec<ScanHistory> = state
      .history
      .iter()
      .filter(|h| h.run_id == run_id)
      .cloned()
      .collect();
    history.sort_by_key(|h| (h.step_index, h.started_at));
    Ok(history)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{run_row, step_row};
  use reconflow_manifest::BucketKind;
  use serde_json::json;

  #[tokio::test]
  async fn test_create_run_rejects_duplicate_steps() {
    let store = MemoryStore::new();
    let run = run_row("run-1", "user-1", 2, Utc::now());
    let steps = vec![step_row("run-1", 0, "httpx"), step_row("run-1", 0, "nuclei")];

    assert!(store.create_run(&run, &steps).await.is_err());
    assert!(matches!(store.get_run("run-1").await, Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn test_claim_requires_no_running_sibling() {
    let store = MemoryStore::new();
    let run = run_row("run-1", "user-1", 2, Utc::now());
    let steps = vec![step_row("run-1", 0, "subfinder"), step_row("run-1", 1, "httpx")];
    store.create_run(&run, &steps).await.unwrap();

    let options = json!({});
    assert!(store.claim_step("run-1", 0, "h1", &options, Utc::now()).await.unwrap());
    assert!(!store.claim_step("run-1", 1, "h2", &options, Utc::now()).await.unwrap());

    let done = StepUpdate::new(StepStatus::Failed).with_history("hist-1");
    assert!(store.update_step("run-1", 0, StepStatus::Running, &done, Utc::now()).await.unwrap());
    // Forward-only: a failed step cannot be completed.
    let again = StepUpdate::new(StepStatus::Completed);
    assert!(!store.update_step("run-1", 0, StepStatus::Running, &again, Utc::now()).await.unwrap());

    let step = store.get_step("run-1", 0).await.unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.history_id.as_deref(), Some("hist-1"));
    assert!(step.completed_at.is_some());
  }

  #[tokio::test]
  async fn test_finish_step_writes_step_and_manifest_together() {
    let store = MemoryStore::new();
    let started = Utc::now() - chrono::Duration::minutes(5);
    let run = run_row("run-1", "user-1", 2, started);
    let steps = vec![step_row("run-1", 0, "subfinder"), step_row("run-1", 1, "httpx")];
    store.create_run(&run, &steps).await.unwrap();
    store
      .transition_run("run-1", RunStatus::Queued, RunStatus::Running, None, started)
      .await
      .unwrap();

    let claimed_at = Utc::now();
    assert!(store.claim_step("run-1", 0, "h1", &json!({}), claimed_at).await.unwrap());
    assert_eq!(store.get_run("run-1").await.unwrap().updated_at, claimed_at);

    let mut manifest = RunManifest::new();
    manifest.merge_all(0, "subfinder", &[(BucketKind::Domains, vec![json!("example.com")])].into());
    let done = StepUpdate::new(StepStatus::Completed);
    let outcome = store
      .finish_step("run-1", 0, StepStatus::Running, &done, &manifest, 50.0, Utc::now())
      .await
      .unwrap();
    assert_eq!(outcome, StepFinish::Recorded);

    let run = store.get_run("run-1").await.unwrap();
    assert_eq!(run.progress, 50.0);
    assert_eq!(run.manifest.0.bucket(BucketKind::Domains), &[json!("example.com")]);

    // A second finish of the same step is stale and leaves the run alone.
    let outcome = store
      .finish_step("run-1", 0, StepStatus::Running, &done, &RunManifest::new(), 0.0, Utc::now())
      .await
      .unwrap();
    assert_eq!(outcome, StepFinish::Stale);
    assert_eq!(store.get_run("run-1").await.unwrap().progress, 50.0);
  }

  #[tokio::test]
  async fn test_cancel_queued_steps() {
    let store = MemoryStore::new();
    let run = run_row("run-1", "user-1", 3, Utc::now());
    let steps: Vec<_> = (0..3).map(|i| step_row("run-1", i, "httpx")).collect();
    store.create_run(&run, &steps).await.unwrap();
    store.claim_step("run-1", 0, "h1", &json!({}), Utc::now()).await.unwrap();

    assert_eq!(store.cancel_queued_steps("run-1", Utc::now()).await.unwrap(), 2);
    let statuses: Vec<_> = store
      .list_steps("run-1")
      .await
      .unwrap()
      .into_iter()
      .map(|s| s.status)
      .collect();
    assert_eq!(
      statuses,
      vec![StepStatus::Running, StepStatus::Canceled, StepStatus::Canceled]
    );
  }

  #[tokio::test]
  async fn test_delete_run_removes_everything() {
    let store = MemoryStore::new();
    store
      .create_run(&run_row("run-1", "user-1", 1, Utc::now()), &[step_row("run-1", 0, "httpx")])
      .await
      .unwrap();
    store.delete_run("run-1").await.unwrap();

    assert!(store.get_run("run-1").await.is_err());
    assert!(store.list_steps("run-1").await.unwrap().is_empty());
  }
}
