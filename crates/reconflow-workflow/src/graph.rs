use std::collections::HashMap;

use reconflow_config::{Edge, NodeDef};

/// Edge view of a definition, used to check that it is a single chain.
#[derive(Debug, Clone)]
pub struct Graph {
  successors: HashMap<String, Vec<String>>,
  in_degree: HashMap<String, usize>,
  /// Nodes nothing points at, in declaration order.
  sources: Vec<String>,
}

impl Graph {
  pub fn new(nodes: &[NodeDef], edges: &[Edge]) -> Self {
    let mut successors: HashMap<String, Vec<String>> = nodes
      .iter()
      .map(|n| (n.node_id.clone(), Vec::new()))
      .collect();
    let mut in_degree: HashMap<String, usize> = nodes.iter().map(|n| (n.node_id.clone(), 0)).collect();

    for edge in edges {
      successors.entry(edge.from.clone()).or_default().push(edge.to.clone());
      *in_degree.entry(edge.to.clone()).or_default() += 1;
    }

    let sources = nodes
      .iter()
      .filter(|n| in_degree.get(&n.node_id).copied().unwrap_or(0) == 0)
      .map(|n| n.node_id.clone())
      .collect();

    Self {
      successors,
      in_degree,
      sources,
    }
  }

  pub fn sources(&self) -> &[String] {
    &self.sources
  }

  /// The first successor of `node_id`. Chains have at most one.
  pub fn successor(&self, node_id: &str) -> Option<&str> {
    self
      .successors
      .get(node_id)
      .and_then(|next| next.first())
      .map(String::as_str)
  }

  /// Nodes with more than one successor, sorted.
  pub fn fan_out(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self
      .successors
      .iter()
      .filter(|(_, next)| next.len() > 1)
      .map(|(id, _)| id.as_str())
      .collect();
    ids.sort_unstable();
    ids
  }

  /// Nodes with more than one predecessor, sorted.
  pub fn fan_in(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self
      .in_degree
      .iter()
      .filter(|(_, degree)| **degree > 1)
      .map(|(id, _)| id.as_str())
      .collect();
    ids.sort_unstable();
    ids
  }
}
