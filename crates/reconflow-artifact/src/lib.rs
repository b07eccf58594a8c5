//! Reconflow Artifact
//!
//! Artifact storage for output files produced by tool adapters. Files are
//! staged under a per-run, per-step key so a run's artifacts can be listed and
//! pruned as a unit.
//!
//! Content moves through [`Store`] as byte streams, never whole buffers.

mod fs;

pub use fs::FsStore;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Artifact content as it is read or written.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("artifact not found: {0}")]
  NotFound(String),

  /// The key escapes the store or is otherwise malformed.
  #[error("invalid artifact key: {0}")]
  InvalidKey(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Where staged output files live.
#[async_trait]
pub trait Store: Send + Sync {
  /// Stream an artifact back.
  async fn get(&self, key: &str) -> Result<ByteStream, Error>;

  /// Write an artifact, replacing any existing one at `key`.
  async fn put(&self, key: &str, data: ByteStream, content_type: &str) -> Result<(), Error>;

  async fn delete(&self, key: &str) -> Result<(), Error>;

  /// Delete every artifact under a key prefix. Missing prefixes are not an
  /// error.
  async fn delete_prefix(&self, prefix: &str) -> Result<(), Error>;
}

/// Staging key for a step's output file:
/// `<run_id>/<NNN>_<tool_slug>/<file_name>`.
pub fn staging_key(run_id: &str, step_index: usize, tool_slug: &str, file_name: &str) -> String {
  format!("{run_id}/{step_index:03}_{tool_slug}/{file_name}")
}

/// Open a local file as a [`ByteStream`].
pub async fn file_stream(path: &Path) -> Result<ByteStream, Error> {
  let file = File::open(path).await.map_err(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      Error::NotFound(path.display().to_string())
    } else {
      Error::Io(e)
    }
  })?;
  let stream = ReaderStream::new(file).map(|r| r.map_err(Error::Io));
  Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_staging_key_pads_step_index() {
    assert_eq!(
      staging_key("run-1", 7, "httpx", "httpx.out"),
      "run-1/007_httpx/httpx.out"
    );
    assert_eq!(
      staging_key("run-1", 1234, "nuclei", "report.json"),
      "run-1/1234_nuclei/report.json"
    );
  }
}
