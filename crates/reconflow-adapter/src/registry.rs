use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ToolAdapter;

/// Startup-time map from tool slug to adapter.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
  adapters: BTreeMap<String, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an adapter, replacing any previous one for the slug.
  pub fn register(&mut self, slug: impl Into<String>, adapter: Arc<dyn ToolAdapter>) {
    self.adapters.insert(slug.into(), adapter);
  }

  pub fn with(mut self, slug: impl Into<String>, adapter: Arc<dyn ToolAdapter>) -> Self {
    self.register(slug, adapter);
    self
  }

  pub fn get(&self, slug: &str) -> Option<Arc<dyn ToolAdapter>> {
    self.adapters.get(slug).cloned()
  }

  pub fn slugs(&self) -> impl Iterator<Item = &str> {
    self.adapters.keys().map(String::as_str)
  }
}
