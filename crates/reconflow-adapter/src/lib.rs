//! Reconflow Adapter
//!
//! The contract between the engine and the scanning tools it drives. An
//! adapter receives [`AdapterOptions`] (resolved policy, typed input buckets,
//! scratch directory) and returns an [`AdapterResult`] with typed output
//! buckets. Adapters are registered by tool slug in an [`AdapterRegistry`] at
//! startup.

mod command;
mod error;
mod options;
mod reason;
mod registry;
mod result;

pub use command::{CommandAdapter, which};
pub use error::AdapterError;
pub use options::AdapterOptions;
pub use reason::FailureReason;
pub use registry::AdapterRegistry;
pub use result::{AdapterResult, AdapterStatus, Diagnostics};

use async_trait::async_trait;

/// A scanning tool integration.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
  /// Run the tool once with the composed options.
  ///
  /// Expected tool failures (missing binary, non-zero exit) are reported as
  /// an error-status [`AdapterResult`]. `Err` is reserved for unexpected
  /// faults and is treated by the engine like a crash.
  async fn run(&self, options: AdapterOptions) -> Result<AdapterResult, AdapterError>;
}
