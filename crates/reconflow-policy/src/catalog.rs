use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use reconflow_config::ToolOverride;

use crate::error::PolicyError;

/// Source of per-tool override rows.
#[async_trait]
pub trait PolicyCatalog: Send + Sync {
  /// Get the override row for a tool, if any.
  async fn get(&self, slug: &str) -> Result<Option<ToolOverride>, PolicyError>;
}

/// In-memory catalog, typically loaded from settings.
///
/// Mutations do not notify any resolver; callers pair them with
/// [`crate::PolicyResolver::invalidate`].
#[derive(Default)]
pub struct StaticCatalog {
  rows: RwLock<BTreeMap<String, ToolOverride>>,
}

impl StaticCatalog {
  pub fn new(rows: BTreeMap<String, ToolOverride>) -> Self {
    Self {
      rows: RwLock::new(rows),
    }
  }

  pub fn set(&self, slug: impl Into<String>, row: ToolOverride) {
    let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
    rows.insert(slug.into(), row);
  }

  pub fn remove(&self, slug: &str) {
    let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
    rows.remove(slug);
  }
}

#[async_trait]
impl PolicyCatalog for StaticCatalog {
  async fn get(&self, slug: &str) -> Result<Option<ToolOverride>, PolicyError> {
    let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
    Ok(rows.get(slug).cloned())
  }
}
