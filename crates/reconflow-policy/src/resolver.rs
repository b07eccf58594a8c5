use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::baseline::Baseline;
use crate::catalog::PolicyCatalog;
use crate::error::PolicyError;
use crate::policy::ToolPolicy;

/// Resolves and caches effective tool policies.
///
/// Each slug is resolved once (baseline narrowed by its catalog row) and
/// cached until invalidated.
pub struct PolicyResolver {
  baseline: Baseline,
  catalog: Arc<dyn PolicyCatalog>,
  cache: RwLock<HashMap<String, Arc<ToolPolicy>>>,
}

impl PolicyResolver {
  pub fn new(baseline: Baseline, catalog: Arc<dyn PolicyCatalog>) -> Self {
    Self {
      baseline,
      catalog,
      cache: RwLock::new(HashMap::new()),
    }
  }

  pub fn baseline(&self) -> &Baseline {
    &self.baseline
  }

  /// Resolve a tool's effective policy.
  ///
  /// Unknown and disabled tools yield [`ToolPolicy::empty`].
  pub async fn resolve(&self, slug: &str) -> Result<Arc<ToolPolicy>, PolicyError> {
    {
      let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
      if let Some(policy) = cache.get(slug) {
        return Ok(policy.clone());
      }
    }

    let policy = match self.baseline.get(slug) {
      Some(base) => match self.catalog.get(slug).await? {
        Some(row) => base.narrow(&row),
        None => base.clone(),
      },
      None => ToolPolicy::empty(slug),
    };
    debug!(tool = %slug, enabled = policy.enabled, "resolved tool policy");

    let policy = Arc::new(policy);
    {
      let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
      cache.insert(slug.to_string(), policy.clone());
    }

    Ok(policy)
  }

  /// Drop the cached policy for a tool after its catalog row changed.
  pub fn invalidate(&self, slug: &str) {
    let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
    cache.remove(slug);
  }

  /// Drop every cached policy.
  pub fn invalidate_all(&self) {
    let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
    cache.clear();
  }
}
