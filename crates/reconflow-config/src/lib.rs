//! Reconflow Config
//!
//! This crate contains the serializable configuration types for reconflow:
//! workflow definitions as authored by users, and the engine settings that
//! control admission, reconciliation, and artifact staging.
//!
//! Workflow definitions can be loaded from:
//! - JSON files (via the CLI)
//! - Database storage (as JSON blobs)
//!
//! The run builder takes these definitions, validates their ordering, and
//! snapshots each node's resolved tool policy into the steps of a run.

mod edge;
mod node;
mod overrides;
mod settings;
mod workflow;

pub use edge::Edge;
pub use node::{NodeConfig, NodeDef};
pub use overrides::{BoundOverride, ToolOverride};
pub use settings::{ConfigError, Settings};
pub use workflow::WorkflowDef;
