#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reconflow_adapter::{AdapterError, AdapterOptions, AdapterRegistry, AdapterResult, ToolAdapter};
use reconflow_artifact::FsStore;
use reconflow_config::{Edge, NodeConfig, NodeDef, WorkflowDef};
use reconflow_kv::{CounterStore, MemoryCounterStore};
use reconflow_manifest::BucketKind::{self, *};
use reconflow_orchestrator::{
  AdmissionController, BroadcastPublisher, ChannelQueue, Coordinator, InputComposer, Limits, RunBuilder,
  RunEvent, RunEventType, WorkUnit,
};
use reconflow_policy::{Baseline, FieldKind, PolicyResolver, SchemaField, StaticCatalog, ToolPolicy};
use reconflow_store::{MemoryStore, Store, WorkflowRun, WorkflowRunStep};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

/// Tools used by the scenarios, independent of the shipped baseline.
pub fn baseline() -> Baseline {
  Baseline::new()
    .with_tool(ToolPolicy::new("subfinder", "subdomain").produces(&[Domains]))
    .with_tool(
      ToolPolicy::new("assetfinder", "subdomain")
        .consumes(&[Domains])
        .produces(&[Domains]),
    )
    .with_tool(
      ToolPolicy::new("naabu", "portscan")
        .consumes(&[Domains, Hosts])
        .produces(&[Ports])
        .timeout_secs(3600),
    )
    .with_tool(
      ToolPolicy::new("httpx", "probe")
        .consumes(&[Domains, Urls])
        .produces(&[Urls]),
    )
    .with_tool(
      ToolPolicy::new("katana", "crawl")
        .consumes(&[Urls])
        .produces(&[Urls, Endpoints]),
    )
    .with_tool(
      ToolPolicy::new("ffuf", "fuzz")
        .consumes(&[Urls])
        .produces(&[Endpoints])
        .field(SchemaField::new("wordlist", FieldKind::String).required()),
    )
    .with_tool(
      ToolPolicy::new("nuclei", "vuln")
        .consumes(&[Urls])
        .produces(&[Vulns])
        .timeout_secs(1),
    )
}

/// A linear definition over `tools`, connected by edges in order.
pub fn chain(tools: &[&str]) -> WorkflowDef {
  let nodes = tools
    .iter()
    .enumerate()
    .map(|(i, tool)| NodeDef {
      node_id: format!("n{i}"),
      tool: tool.to_string(),
      position: None,
      config: NodeConfig::default(),
    })
    .collect();
  let edges = (1..tools.len())
    .map(|i| Edge::new(format!("n{}", i - 1), format!("n{i}")))
    .collect();
  WorkflowDef {
    workflow_id: "wf-test".to_string(),
    name: "test chain".to_string(),
    nodes,
    edges,
  }
}

pub enum Behavior {
  Emit(BTreeMap<BucketKind, Vec<Value>>),
  Fail,
  Panic,
  Hang,
  Crash,
}

/// In-process adapter that records every invocation.
pub struct FakeAdapter {
  behavior: Behavior,
  calls: Mutex<Vec<AdapterOptions>>,
}

impl FakeAdapter {
  pub fn new(behavior: Behavior) -> Arc<Self> {
    Arc::new(Self {
      behavior,
      calls: Mutex::new(Vec::new()),
    })
  }

  pub fn emitting(kind: BucketKind, items: &[&str]) -> Arc<Self> {
    let mut buckets = BTreeMap::new();
    buckets.insert(kind, items.iter().map(|i| json!(i)).collect());
    Self::new(Behavior::Emit(buckets))
  }

  pub fn calls(&self) -> Vec<AdapterOptions> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl ToolAdapter for FakeAdapter {
  async fn run(&self, options: AdapterOptions) -> Result<AdapterResult, AdapterError> {
    self.calls.lock().unwrap().push(options.clone());
    match &self.behavior {
      Behavior::Emit(buckets) => {
        let output_file = options.scratch_dir.join(format!("{}.out", options.tool_slug));
        tokio::fs::write(&output_file, serde_json::to_vec(buckets).unwrap()).await?;
        let mut result = AdapterResult::ok(format!("{} done", options.tool_slug))
          .with_output_file(output_file)
          .with_raw_output("x".repeat(10_000));
        for (kind, items) in buckets {
          result = result.with_bucket(*kind, items.clone());
        }
        Ok(result)
      }
      Behavior::Fail => Ok(AdapterResult::error(
        reconflow_adapter::FailureReason::AdapterError,
        "tool exited with status 2",
      )),
      Behavior::Panic => panic!("adapter blew up"),
      Behavior::Hang => {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AdapterResult::ok("too late"))
      }
      Behavior::Crash => Err(AdapterError::Failed("segfault".to_string())),
    }
  }
}

/// Coordinator wired to in-memory backends, driven by hand.
pub struct Harness {
  pub dir: TempDir,
  pub store: Arc<dyn Store>,
  pub counters: Arc<MemoryCounterStore>,
  pub catalog: Arc<StaticCatalog>,
  pub builder: RunBuilder,
  pub coordinator: Arc<Coordinator>,
  pub receiver: Option<mpsc::UnboundedReceiver<WorkUnit>>,
  pub events: broadcast::Receiver<(String, RunEvent)>,
}

impl Harness {
  pub fn new(adapters: AdapterRegistry) -> Self {
    Self::with_store(Arc::new(MemoryStore::new()), adapters, 1)
  }

  pub fn with_store(store: Arc<dyn Store>, adapters: AdapterRegistry, max_active: u32) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(MemoryCounterStore::new());
    let catalog = Arc::new(StaticCatalog::default());
    let resolver = Arc::new(PolicyResolver::new(baseline(), catalog.clone()));
    let publisher = Arc::new(BroadcastPublisher::new(256));
    let events = publisher.subscribe();

    let (queue, receiver) = ChannelQueue::new("workflow_steps");
    let admission = AdmissionController::new(counters.clone(), max_active, Duration::from_secs(21600));
    let coordinator = Coordinator::new(
      store.clone(),
      Arc::new(queue),
      admission,
      Arc::new(FsStore::new(dir.path().join("artifacts"))),
      InputComposer::new(dir.path().join("scratch")),
      adapters,
    )
    .with_publisher(publisher.clone())
    .with_limits(Limits {
      raw_output_tail_chars: 100,
      ..Limits::default()
    });

    Self {
      builder: RunBuilder::new(store.clone(), resolver, publisher),
      dir,
      store,
      counters,
      catalog,
      coordinator: Arc::new(coordinator),
      receiver: Some(receiver),
      events,
    }
  }

  /// Build a run over `tools` and advance it once.
  pub async fn start(&self, tools: &[&str], user_id: &str, seeds: &[&str]) -> String {
    self.start_def(&chain(tools), user_id, seeds).await
  }

  pub async fn start_def(&self, def: &WorkflowDef, user_id: &str, seeds: &[&str]) -> String {
    let seeds: Vec<String> = seeds.iter().map(|s| s.to_string()).collect();
    let run = self.builder.build(def, user_id, &seeds).await.unwrap();
    self.coordinator.advance(&run.run_id).await.unwrap();
    run.run_id
  }

  /// Take the next dispatched unit, if any.
  pub fn next_unit(&mut self) -> Option<WorkUnit> {
    self.receiver.as_mut()?.try_recv().ok()
  }

  /// Execute the next dispatched unit. Returns false when none was queued.
  pub async fn step_once(&mut self) -> bool {
    let Some(unit) = self.next_unit() else {
      return false;
    };
    self.coordinator.execute_step(unit).await.unwrap();
    true
  }

  /// Execute dispatched units until the queue is empty.
  pub async fn drain(&mut self) -> usize {
    let mut executed = 0;
    while self.step_once().await {
      executed += 1;
    }
    executed
  }

  pub async fn run(&self, run_id: &str) -> WorkflowRun {
    self.store.get_run(run_id).await.unwrap()
  }

  pub async fn steps(&self, run_id: &str) -> Vec<WorkflowRunStep> {
    self.store.list_steps(run_id).await.unwrap()
  }

  pub async fn active(&self, user_id: &str) -> i64 {
    self.counters.get(&format!("workflow:active:{user_id}")).await.unwrap()
  }

  /// Event types published so far for a run.
  pub fn event_types(&mut self, run_id: &str) -> Vec<RunEventType> {
    let mut types = Vec::new();
    while let Ok((_, event)) = self.events.try_recv() {
      if event.run_id == run_id {
        types.push(event.event_type);
      }
    }
    types
  }
}
