use std::collections::{HashMap, HashSet};

use reconflow_config::{NodeConfig, NodeDef, WorkflowDef};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::Graph;

/// How the execution order of a chain was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOrder {
  /// Order follows the definition's edges.
  Edges,
  /// The definition had no edges; order falls back to node positions.
  Position,
}

/// A node at a fixed index in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainNode {
  pub index: usize,
  pub node_id: String,
  pub tool: String,
  pub config: NodeConfig,
  /// Explicit upstream step indices from `input_from`, all lower than `index`.
  pub input_from: Option<Vec<usize>>,
}

/// The validated, ordered sequence of nodes a run executes.
#[derive(Debug, Clone)]
pub struct LinearChain {
  workflow_id: String,
  nodes: Vec<ChainNode>,
  order: ChainOrder,
}

impl LinearChain {
  /// Build a linear chain from a workflow definition.
  pub fn from_def(def: &WorkflowDef) -> Result<Self, WorkflowError> {
    if def.nodes.is_empty() {
      return Err(WorkflowError::Empty);
    }

    let mut seen = HashSet::new();
    for node in &def.nodes {
      if !seen.insert(node.node_id.as_str()) {
        return Err(WorkflowError::DuplicateNode(node.node_id.clone()));
      }
    }

    for edge in &def.edges {
      if !seen.contains(edge.from.as_str()) || !seen.contains(edge.to.as_str()) {
        return Err(WorkflowError::InvalidEdge {
          from: edge.from.clone(),
          to: edge.to.clone(),
        });
      }
    }

    let (ordered, order) = if def.edges.is_empty() && def.nodes.len() > 1 {
      (position_order(&def.nodes), ChainOrder::Position)
    } else {
      (edge_order(def)?, ChainOrder::Edges)
    };

    let index_of: HashMap<&str, usize> = ordered
      .iter()
      .enumerate()
      .map(|(i, node)| (node.node_id.as_str(), i))
      .collect();

    let nodes = ordered
      .iter()
      .enumerate()
      .map(|(index, node)| {
        let input_from = match &node.config.input_from {
          Some(ids) => Some(resolve_upstream(node, index, ids, &index_of)?),
          None => None,
        };
        Ok(ChainNode {
          index,
          node_id: node.node_id.clone(),
          tool: node.tool.clone(),
          config: node.config.clone(),
          input_from,
        })
      })
      .collect::<Result<Vec<_>, WorkflowError>>()?;

    Ok(Self {
      workflow_id: def.workflow_id.clone(),
      nodes,
      order,
    })
  }

  pub fn workflow_id(&self) -> &str {
    &self.workflow_id
  }

  pub fn nodes(&self) -> &[ChainNode] {
    &self.nodes
  }

  pub fn get(&self, index: usize) -> Option<&ChainNode> {
    self.nodes.get(index)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn order(&self) -> ChainOrder {
    self.order
  }
}

/// Sort by explicit position; nodes without one keep declaration order after
/// the positioned ones.
fn position_order(nodes: &[NodeDef]) -> Vec<&NodeDef> {
  let mut ordered: Vec<(usize, &NodeDef)> = nodes.iter().enumerate().collect();
  ordered.sort_by_key(|(declared, node)| (node.position.unwrap_or(u32::MAX), *declared));
  ordered.into_iter().map(|(_, node)| node).collect()
}

/// Walk the single successor chain from the only source node.
fn edge_order(def: &WorkflowDef) -> Result<Vec<&NodeDef>, WorkflowError> {
  let graph = Graph::new(&def.nodes, &def.edges);

  if let Some(node) = graph.fan_out().first() {
    return Err(WorkflowError::NonLinear {
      reason: format!("node '{node}' has more than one successor"),
    });
  }
  if let Some(node) = graph.fan_in().first() {
    return Err(WorkflowError::NonLinear {
      reason: format!("node '{node}' has more than one predecessor"),
    });
  }

  let source = match graph.sources() {
    [] => return Err(WorkflowError::NoEntryPoints),
    [source] => source,
    many => {
      return Err(WorkflowError::NonLinear {
        reason: format!("multiple source nodes: {}", many.join(", ")),
      });
    }
  };

  let by_id: HashMap<&str, &NodeDef> = def.nodes.iter().map(|n| (n.node_id.as_str(), n)).collect();
  let mut ordered = Vec::with_capacity(def.nodes.len());
  let mut visited = HashSet::new();
  let mut current = Some(source.as_str());

  while let Some(id) = current {
    if !visited.insert(id) {
      return Err(WorkflowError::NonLinear {
        reason: format!("cycle through node '{id}'"),
      });
    }
    if let Some(node) = by_id.get(id) {
      ordered.push(*node);
    }
    current = graph.successor(id);
  }

  if ordered.len() != def.nodes.len() {
    let missing: Vec<&str> = def
      .nodes
      .iter()
      .map(|n| n.node_id.as_str())
      .filter(|id| !visited.contains(id))
      .collect();
    return Err(WorkflowError::NonLinear {
      reason: format!("nodes not reachable from source: {}", missing.join(", ")),
    });
  }

  Ok(ordered)
}

fn resolve_upstream(
  node: &NodeDef,
  index: usize,
  ids: &[String],
  index_of: &HashMap<&str, usize>,
) -> Result<Vec<usize>, WorkflowError> {
  ids
    .iter()
    .map(|id| match index_of.get(id.as_str()) {
      Some(upstream) if *upstream < index => Ok(*upstream),
      _ => Err(WorkflowError::InvalidUpstream {
        node_id: node.node_id.clone(),
        upstream: id.clone(),
      }),
    })
    .collect()
}
