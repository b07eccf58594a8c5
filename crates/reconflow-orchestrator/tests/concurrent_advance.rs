mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{FakeAdapter, Harness};
use reconflow_adapter::AdapterRegistry;
use reconflow_manifest::BucketKind::*;
use reconflow_manifest::RunManifest;
use reconflow_orchestrator::Coordinator;
use reconflow_store::{
  Error, MemoryStore, RunStatus, ScanHistory, StepFinish, StepStatus, StepUpdate, Store, WorkflowRun,
  WorkflowRunStep,
};
use serde_json::{Value, json};

/// Store that runs a second `advance` right after the first write that
/// finishes a RUNNING step, as a promoter or another worker would.
struct AdvanceAfterFinish {
  inner: MemoryStore,
  coordinator: OnceLock<Weak<Coordinator>>,
  fired: AtomicBool,
}

impl AdvanceAfterFinish {
  fn new() -> Self {
    Self {
      inner: MemoryStore::new(),
      coordinator: OnceLock::new(),
      fired: AtomicBool::new(false),
    }
  }

  async fn interleave(&self, run_id: &str) {
    if self.fired.swap(true, Ordering::SeqCst) {
      return;
    }
    let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) else {
      return;
    };
    coordinator.advance(run_id).await.unwrap();
  }
}

#[async_trait]
impl Store for AdvanceAfterFinish {
  async fn create_run(&self, run: &WorkflowRun, steps: &[WorkflowRunStep]) -> Result<(), Error> {
    self.inner.create_run(run, steps).await
  }

  async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, Error> {
    self.inner.get_run(run_id).await
  }

  async fn list_runs_by_status(&self, status: RunStatus, limit: u32) -> Result<Vec<WorkflowRun>, Error> {
    self.inner.list_runs_by_status(status, limit).await
  }

  async fn list_stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error> {
    self.inner.list_stale_runs(cutoff).await
  }

  async fn list_expired_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowRun>, Error> {
    self.inner.list_expired_runs(cutoff).await
  }

  async fn transition_run(
    &self,
    run_id: &str,
    from: RunStatus,
    to: RunStatus,
    error: Option<&str>,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    self.inner.transition_run(run_id, from, to, error, at).await
  }

  async fn save_run_progress(
    &self,
    run_id: &str,
    manifest: &RunManifest,
    progress: f64,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    self.inner.save_run_progress(run_id, manifest, progress, at).await
  }

  async fn delete_run(&self, run_id: &str) -> Result<(), Error> {
    self.inner.delete_run(run_id).await
  }

  async fn list_steps(&self, run_id: &str) -> Result<Vec<WorkflowRunStep>, Error> {
    self.inner.list_steps(run_id).await
  }

  async fn get_step(&self, run_id: &str, step_index: i64) -> Result<WorkflowRunStep, Error> {
    self.inner.get_step(run_id, step_index).await
  }

  async fn claim_step(
    &self,
    run_id: &str,
    step_index: i64,
    task_handle: &str,
    input_manifest: &Value,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    self
      .inner
      .claim_step(run_id, step_index, task_handle, input_manifest, at)
      .await
  }

  async fn update_step(
    &self,
    run_id: &str,
    step_index: i64,
    expected: StepStatus,
    update: &StepUpdate,
    at: DateTime<Utc>,
  ) -> Result<bool, Error> {
    let updated = self.inner.update_step(run_id, step_index, expected, update, at).await?;
    if updated && expected == StepStatus::Running && update.status.is_terminal() {
      self.interleave(run_id).await;
    }
    Ok(updated)
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
    let outcome = self
      .inner
      .finish_step(run_id, step_index, expected, update, manifest, progress, at)
      .await?;
    if outcome != StepFinish::Stale && expected == StepStatus::Running {
      self.interleave(run_id).await;
    }
    Ok(outcome)
  }

  async fn cancel_queued_steps(&self, run_id: &str, at: DateTime<Utc>) -> Result<u64, Error> {
    self.inner.cancel_queued_steps(run_id, at).await
  }

  async fn create_history(&self, history: &ScanHistory) -> Result<(), Error> {
    self.inner.create_history(history).await
  }

  async fn list_history(&self, run_id: &str) -> Result<Vec<ScanHistory>, Error> {
    self.inner.list_history(run_id).await
  }
}

#[tokio::test]
async fn test_advance_right_after_step_finishes_sees_its_buckets() {
  let subfinder = FakeAdapter::emitting(Domains, &["example.com"]);
  let httpx = FakeAdapter::emitting(Urls, &["https://example.com/"]);
  let store = Arc::new(AdvanceAfterFinish::new());
  let mut h = Harness::with_store(
    store.clone(),
    AdapterRegistry::new()
      .with("subfinder", subfinder.clone())
      .with("httpx", httpx.clone()),
    1,
  );
  assert!(store.coordinator.set(Arc::downgrade(&h.coordinator)).is_ok());

  let run_id = h.start(&["subfinder", "httpx"], "alice", &[]).await;
  assert_eq!(h.drain().await, 2);
  assert!(store.fired.load(Ordering::SeqCst));

  // The interleaved advance dispatched httpx with subfinder's domains
  // instead of skipping it.
  let calls = httpx.calls();
  assert_eq!(calls.len(), 1);
  assert_eq!(calls[0].input(Domains), &[json!("example.com")]);

  let steps = h.steps(&run_id).await;
  assert_eq!(steps[1].status, StepStatus::Completed);

  let run = h.run(&run_id).await;
  assert_eq!(run.status, RunStatus::Completed);
  assert_eq!(run.manifest.0.bucket(Domains), &[json!("example.com")]);
  assert_eq!(run.manifest.0.bucket(Urls), &[json!("https://example.com/")]);
  assert_eq!(h.active("alice").await, 0);
}
