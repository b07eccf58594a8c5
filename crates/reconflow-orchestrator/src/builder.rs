use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use reconflow_config::WorkflowDef;
use reconflow_manifest::{BucketKind, RunManifest, bucketize};
use reconflow_policy::PolicyResolver;
use reconflow_store::{Json, RunStatus, StepStatus, Store, WorkflowRun, WorkflowRunStep};
use reconflow_workflow::{ChainOrder, LinearChain};
use serde_json::json;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::events::{EventPublisher, RunEvent, RunEventType, run_channel};
use crate::step::StepInput;

/// Turns a workflow definition into a persisted, queued run.
pub struct RunBuilder {
  store: Arc<dyn Store>,
  resolver: Arc<PolicyResolver>,
  publisher: Arc<dyn EventPublisher>,
}

impl RunBuilder {
  pub fn new(
    store: Arc<dyn Store>,
    resolver: Arc<PolicyResolver>,
    publisher: Arc<dyn EventPublisher>,
  ) -> Self {
    Self {
      store,
      resolver,
      publisher,
    }
  }

  /// Validate the definition's order, snapshot every node's policy, and
  /// create the run with one QUEUED step per node in a single transaction.
  ///
  /// `seeds` are free-form global seed values (domains, URLs, IPs).
  pub async fn build(
    &self,
    def: &WorkflowDef,
    user_id: &str,
    seeds: &[String],
  ) -> Result<WorkflowRun, OrchestratorError> {
    let chain = LinearChain::from_def(def)?;
    if chain.order() == ChainOrder::Position {
      warn!(
        workflow_id = %def.workflow_id,
        "workflow has no edges, falling back to position order"
      );
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    let mut steps = Vec::with_capacity(chain.len());
    for node in chain.nodes() {
      let policy = self.resolver.resolve(&node.tool).await?;
      let input = StepInput {
        node_id: node.node_id.clone(),
        tool_slug: node.tool.clone(),
        policy: policy.as_ref().clone(),
        config: node.config.clone(),
        input_from: node.input_from.clone(),
        options: None,
      };
      steps.push(WorkflowRunStep {
        run_id: run_id.clone(),
        step_index: node.index as i64,
        node_id: node.node_id.clone(),
        tool_slug: node.tool.clone(),
        status: StepStatus::Queued,
        input_manifest: Json(input.to_value()?),
        output_manifest: None,
        task_handle: None,
        history_id: None,
        started_at: None,
        completed_at: None,
        updated_at: now,
      });
    }

    let seeds: BTreeMap<BucketKind, Vec<String>> = bucketize(&seeds.join("\n"), &BucketKind::ALL);
    let run = WorkflowRun {
      run_id: run_id.clone(),
      workflow_id: def.workflow_id.clone(),
      user_id: user_id.to_string(),
      status: RunStatus::Queued,
      total_steps: chain.len() as i64,
      progress: 0.0,
      manifest: Json(RunManifest::with_seeds(seeds)),
      error: None,
      created_at: now,
      updated_at: now,
      started_at: None,
      completed_at: None,
    };

    self.store.create_run(&run, &steps).await?;
    info!(
      run_id = %run_id,
      workflow_id = %def.workflow_id,
      user_id = %user_id,
      total_steps = chain.len(),
      "run_queued"
    );
    self.publisher.publish(
      &run_channel(&run_id),
      RunEvent::new(
        RunEventType::RunQueued,
        &run_id,
        json!({
          "workflow_id": def.workflow_id,
          "total_steps": chain.len(),
          "order": chain.order(),
        }),
      ),
    );

    Ok(run)
  }
}
