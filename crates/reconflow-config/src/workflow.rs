use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::node::NodeDef;

/// A workflow definition: tool-bound nodes and the edges between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

impl WorkflowDef {
  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_workflow_def() {
    let def: WorkflowDef = serde_json::from_value(json!({
      "workflow_id": "wf-1",
      "name": "Recon",
      "nodes": [
        { "node_id": "a", "tool": "subfinder" },
        {
          "node_id": "b",
          "tool": "httpx",
          "config": {
            "params": { "threads": 20 },
            "manual_input": "https://extra.example.com",
            "input_from": ["a"]
          }
        }
      ],
      "edges": [{ "from": "a", "to": "b" }]
    }))
    .unwrap();

    assert_eq!(def.nodes.len(), 2);
    assert_eq!(def.edges, vec![Edge::new("a", "b")]);

    let b = def.get_node("b").unwrap();
    assert_eq!(b.tool, "httpx");
    assert_eq!(b.config.params.get("threads"), Some(&json!(20)));
    assert_eq!(b.config.input_from, Some(vec!["a".to_string()]));
    assert!(def.get_node("a").unwrap().config.manual_input.is_none());
  }

  #[test]
  fn test_edges_default_to_empty() {
    let def: WorkflowDef = serde_json::from_value(json!({
      "workflow_id": "wf-2",
      "name": "Single",
      "nodes": [{ "node_id": "only", "tool": "nuclei", "position": 0 }]
    }))
    .unwrap();

    assert!(def.edges.is_empty());
    assert_eq!(def.nodes[0].position, Some(0));
  }
}
