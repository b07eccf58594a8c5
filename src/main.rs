use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reconflow_adapter::{AdapterRegistry, CommandAdapter};
use reconflow_artifact::FsStore;
use reconflow_config::{Settings, WorkflowDef};
use reconflow_orchestrator::{
  AdmissionController, BroadcastPublisher, ChannelQueue, Coordinator, InputComposer, Limits, Reconciler, RunBuilder,
  WorkUnit, WorkerPool, spawn_promoter, spawn_reconciler,
};
use reconflow_policy::{Baseline, PolicyResolver, StaticCatalog};
use reconflow_store::{SqliteStore, Store};

/// Reconflow - chains security-scanning tools into tracked, resumable runs
#[derive(Parser)]
#[command(name = "reconflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.reconflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Settings file (default: <data-dir>/reconflow.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow to completion and print its manifest
  Run {
    /// Path to the workflow definition (JSON)
    workflow_file: PathBuf,

    /// User the run is admitted for
    #[arg(long, default_value = "local")]
    user: String,

    /// Global seed values (domains, URLs, IPs)
    #[arg(long = "seed")]
    seeds: Vec<String>,
  },

  /// Print a run and its steps
  Status { run_id: String },

  /// Cancel a run
  Cancel { run_id: String },

  /// Reap stalled runs and prune expired ones
  Reconcile,

  /// Print the resolved policy of every known tool
  Tools,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reconflow=info,warn")),
    )
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".reconflow"),
  };
  let config = cli
    .config
    .unwrap_or_else(|| data_dir.join("reconflow.toml"));

  let Some(command) = cli.command else {
    println!("reconflow - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Run {
        workflow_file,
        user,
        seeds,
      } => run_workflow(&data_dir, &config, workflow_file, user, seeds).await,
      Commands::Status { run_id } => show_status(&data_dir, &config, &run_id).await,
      Commands::Cancel { run_id } => cancel_run(&data_dir, &config, &run_id).await,
      Commands::Reconcile => reconcile(&data_dir, &config).await,
      Commands::Tools => list_tools(&data_dir, &config).await,
    }
  })
}

/// Everything a command needs, wired from the settings.
struct Engine {
  settings: Settings,
  store: Arc<dyn Store>,
  resolver: Arc<PolicyResolver>,
  publisher: Arc<BroadcastPublisher>,
  coordinator: Arc<Coordinator>,
  receiver: mpsc::UnboundedReceiver<WorkUnit>,
}

async fn engine(data_dir: &Path, config: &Path) -> Result<Engine> {
  let settings = Settings::load(config)
    .with_context(|| format!("failed to load settings: {}", config.display()))?
    .with_data_dir(data_dir);

  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let db_path = data_dir.join("reconflow.db");
  let sqlite = SqliteStore::open(&db_path)
    .await
    .with_context(|| format!("failed to open database: {}", db_path.display()))?;
  sqlite.migrate().await.context("failed to run migrations")?;
  let counters = Arc::new(sqlite.counters());
  let store: Arc<dyn Store> = Arc::new(sqlite);

  let baseline = Baseline::builtin();
  let mut adapters = AdapterRegistry::new();
  for slug in baseline.slugs() {
    adapters.register(slug, Arc::new(CommandAdapter::new()));
  }

  let catalog = Arc::new(StaticCatalog::new(settings.tool_overrides.clone()));
  let resolver = Arc::new(PolicyResolver::new(baseline, catalog));
  let publisher = Arc::new(BroadcastPublisher::new(1024));

  let (queue, receiver) = ChannelQueue::new(settings.queue_name.clone());
  let admission = AdmissionController::new(
    counters,
    settings.max_active_runs_per_user,
    settings.admission_key_ttl(),
  );
  let artifact_dir = settings
    .artifact_dir
    .clone()
    .unwrap_or_else(|| data_dir.join("artifacts"));
  let scratch_dir = settings
    .scratch_dir
    .clone()
    .unwrap_or_else(|| data_dir.join("scratch"));

  let coordinator = Coordinator::new(
    store.clone(),
    Arc::new(queue),
    admission,
    Arc::new(FsStore::new(artifact_dir)),
    InputComposer::new(scratch_dir),
    adapters,
  )
  .with_publisher(publisher.clone())
  .with_limits(Limits {
    raw_output_tail_chars: settings.raw_output_tail_chars,
    message_max_chars: settings.message_max_chars,
    promoter_batch_size: settings.promoter_batch_size,
  });

  Ok(Engine {
    settings,
    store,
    resolver,
    publisher,
    coordinator: Arc::new(coordinator),
    receiver,
  })
}

async fn run_workflow(
  data_dir: &Path,
  config: &Path,
  workflow_file: PathBuf,
  user: String,
  seeds: Vec<String>,
) -> Result<()> {
  let workflow_content = tokio::fs::read_to_string(&workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let workflow_def: WorkflowDef = serde_json::from_str(&workflow_content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let engine = engine(data_dir, config).await?;
  let cancel = CancellationToken::new();

  let mut events = engine.publisher.subscribe();
  let printer = tokio::spawn(async move {
    while let Ok((_, event)) = events.recv().await {
      if let Ok(line) = serde_json::to_string(&event) {
        eprintln!("{line}");
      }
    }
  });

  let workers = WorkerPool::new(
    engine.coordinator.clone(),
    engine.receiver,
    engine.settings.worker_count,
  )
  .start(cancel.clone());
  let reconciler = Arc::new(Reconciler::new(
    engine.coordinator.clone(),
    engine.settings.stale_run_horizon(),
    engine.settings.retention(),
  ));
  let promoter = spawn_promoter(
    engine.coordinator.clone(),
    engine.settings.promoter_interval(),
    cancel.clone(),
  );
  let sweeper = spawn_reconciler(reconciler, engine.settings.reconcile_interval(), cancel.clone());

  let builder = RunBuilder::new(
    engine.store.clone(),
    engine.resolver.clone(),
    engine.publisher.clone(),
  );
  let run = builder
    .build(&workflow_def, &user, &seeds)
    .await
    .context("failed to create run")?;
  info!(run_id = %run.run_id, workflow = %workflow_def.name, "run created");
  engine
    .coordinator
    .advance(&run.run_id)
    .await
    .context("failed to start run")?;

  let run = loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        warn!(run_id = %run.run_id, "interrupted, canceling run");
        engine.coordinator.cancel(&run.run_id).await?;
      }
      _ = tokio::time::sleep(Duration::from_millis(250)) => {}
    }
    let current = engine.store.get_run(&run.run_id).await?;
    if current.status.is_terminal() {
      break current;
    }
  };

  cancel.cancel();
  for handle in workers.into_iter().chain([promoter, sweeper]) {
    let _ = handle.await;
  }
  printer.abort();

  eprintln!(
    "Run {} finished: {} ({}%)",
    run.run_id,
    run.status.as_str(),
    run.progress
  );
  if let Some(error) = &run.error {
    eprintln!("Error: {error}");
  }
  println!("{}", serde_json::to_string_pretty(&run.manifest.0)?);

  Ok(())
}

async fn show_status(data_dir: &Path, config: &Path, run_id: &str) -> Result<()> {
  let engine = engine(data_dir, config).await?;
  let run = engine
    .store
    .get_run(run_id)
    .await
    .with_context(|| format!("run '{run_id}' not found"))?;
  let steps = engine.store.list_steps(run_id).await?;
  let history = engine.store.list_history(run_id).await?;

  let output = serde_json::json!({
    "run": run,
    "steps": steps,
    "history": history,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn cancel_run(data_dir: &Path, config: &Path, run_id: &str) -> Result<()> {
  let engine = engine(data_dir, config).await?;
  if engine
    .coordinator
    .cancel(run_id)
    .await
    .with_context(|| format!("failed to cancel run '{run_id}'"))?
  {
    eprintln!("Run {run_id} canceled");
  } else {
    eprintln!("Run {run_id} is already finished");
  }
  Ok(())
}

async fn reconcile(data_dir: &Path, config: &Path) -> Result<()> {
  let engine = engine(data_dir, config).await?;
  let reconciler = Reconciler::new(
    engine.coordinator.clone(),
    engine.settings.stale_run_horizon(),
    engine.settings.retention(),
  );
  let report = reconciler
    .run_once(Utc::now())
    .await
    .context("reconcile pass failed")?;

  eprintln!(
    "Reaped {} stalled runs, pruned {} expired runs, promoted {} queued runs",
    report.zombies, report.pruned, report.promoted
  );
  Ok(())
}

async fn list_tools(data_dir: &Path, config: &Path) -> Result<()> {
  let engine = engine(data_dir, config).await?;
  let mut policies = Vec::new();
  for slug in engine.resolver.baseline().slugs() {
    let policy = engine
      .resolver
      .resolve(slug)
      .await
      .with_context(|| format!("failed to resolve tool '{slug}'"))?;
    policies.push(policy.as_ref().clone());
  }
  println!("{}", serde_json::to_string_pretty(&policies)?);
  Ok(())
}
