//! Reconflow Workflow
//!
//! This crate turns a workflow definition into a validated linear chain: the
//! explicit, ordered sequence of nodes a run executes.
//!
//! Only linear chains are supported:
//! - Edges, when present, must form one source and a single successor chain
//! - Branches, joins, cycles and disconnected fragments are rejected up front
//! - Definitions without edges fall back to position-based ordering, flagged
//!   as such so callers can surface it

mod chain;
mod error;
mod graph;

pub use chain::{ChainNode, ChainOrder, LinearChain};
pub use error::WorkflowError;
pub use graph::Graph;
