//! Engine settings.
//!
//! Settings are read from a TOML file. Every field has a default, so an empty
//! or missing file yields a working configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::overrides::ToolOverride;

/// Error type for loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
  /// Concurrently active runs allowed per user.
  #[serde(default = "default_max_active_runs")]
  pub max_active_runs_per_user: u32,
  /// Safety-net expiry for admission counters.
  #[serde(default = "default_admission_key_ttl")]
  pub admission_key_ttl_secs: u64,
  /// Runs in RUNNING without an update for this long are force-failed.
  #[serde(default = "default_stale_run_minutes")]
  pub stale_run_minutes: u64,
  /// Terminal runs older than this are deleted with their artifacts.
  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
  #[serde(default = "default_promoter_batch_size")]
  pub promoter_batch_size: u32,
  #[serde(default = "default_promoter_interval")]
  pub promoter_interval_secs: u64,
  #[serde(default = "default_reconcile_interval")]
  pub reconcile_interval_secs: u64,
  #[serde(default = "default_worker_count")]
  pub worker_count: usize,
  #[serde(default = "default_queue_name")]
  pub queue_name: String,
  /// Raw adapter output kept in scan history is bounded to this tail length.
  #[serde(default = "default_raw_output_tail")]
  pub raw_output_tail_chars: usize,
  /// Messages surfaced in manifests and events are truncated to this length.
  #[serde(default = "default_message_max")]
  pub message_max_chars: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifact_dir: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scratch_dir: Option<PathBuf>,
  #[serde(default)]
  pub tool_overrides: BTreeMap<String, ToolOverride>,
}

fn default_max_active_runs() -> u32 {
  1
}

fn default_admission_key_ttl() -> u64 {
  6 * 60 * 60
}

fn default_stale_run_minutes() -> u64 {
  45
}

fn default_retention_days() -> u64 {
  30
}

fn default_promoter_batch_size() -> u32 {
  50
}

fn default_promoter_interval() -> u64 {
  30
}

fn default_reconcile_interval() -> u64 {
  300
}

fn default_worker_count() -> usize {
  2
}

fn default_queue_name() -> String {
  "workflow_steps".to_string()
}

fn default_raw_output_tail() -> usize {
  4000
}

fn default_message_max() -> usize {
  500
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      max_active_runs_per_user: default_max_active_runs(),
      admission_key_ttl_secs: default_admission_key_ttl(),
      stale_run_minutes: default_stale_run_minutes(),
      retention_days: default_retention_days(),
      promoter_batch_size: default_promoter_batch_size(),
      promoter_interval_secs: default_promoter_interval(),
      reconcile_interval_secs: default_reconcile_interval(),
      worker_count: default_worker_count(),
      queue_name: default_queue_name(),
      raw_output_tail_chars: default_raw_output_tail(),
      message_max_chars: default_message_max(),
      artifact_dir: None,
      scratch_dir: None,
      tool_overrides: BTreeMap::new(),
    }
  }
}

impl Settings {
  /// Parse settings from a TOML string.
  pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load settings from a file, falling back to defaults if it does not exist.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    match std::fs::read_to_string(path) {
      Ok(content) => Self::from_toml(&content, path),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
      Err(source) => Err(ConfigError::Read {
        path: path.to_path_buf(),
        source,
      }),
    }
  }

  /// Fill unset directories relative to the data directory.
  pub fn with_data_dir(mut self, data_dir: &Path) -> Self {
    if self.artifact_dir.is_none() {
      self.artifact_dir = Some(data_dir.join("artifacts"));
    }
    if self.scratch_dir.is_none() {
      self.scratch_dir = Some(data_dir.join("scratch"));
    }
    self
  }

  pub fn stale_run_horizon(&self) -> Duration {
    Duration::from_secs(self.stale_run_minutes * 60)
  }

  pub fn retention(&self) -> Duration {
    Duration::from_secs(self.retention_days * 24 * 60 * 60)
  }

  pub fn admission_key_ttl(&self) -> Duration {
    Duration::from_secs(self.admission_key_ttl_secs)
  }

  pub fn promoter_interval(&self) -> Duration {
    Duration::from_secs(self.promoter_interval_secs)
  }

  pub fn reconcile_interval(&self) -> Duration {
    Duration::from_secs(self.reconcile_interval_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::overrides::BoundOverride;
  use reconflow_manifest::BucketKind;

  #[test]
  fn test_empty_file_uses_defaults() {
    let settings = Settings::from_toml("", Path::new("reconflow.toml")).unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.max_active_runs_per_user, 1);
    assert_eq!(settings.stale_run_horizon(), Duration::from_secs(45 * 60));
    assert_eq!(settings.retention(), Duration::from_secs(30 * 86400));
  }

  #[test]
  fn test_parse_overrides() {
    let content = r#"
max_active_runs_per_user = 3
stale_run_minutes = 10

[tool_overrides.httpx]
max_targets = 100
consumes = ["domains"]

[tool_overrides.httpx.runtime.threads]
kind = "numeric"
max = 25

[tool_overrides.nuclei]
enabled = false
"#;
    let settings = Settings::from_toml(content, Path::new("reconflow.toml")).unwrap();
    assert_eq!(settings.max_active_runs_per_user, 3);
    assert_eq!(settings.stale_run_minutes, 10);

    let httpx = settings.tool_overrides.get("httpx").unwrap();
    assert_eq!(httpx.max_targets, Some(100));
    assert_eq!(httpx.consumes, Some(vec![BucketKind::Domains]));
    assert_eq!(
      httpx.runtime.get("threads"),
      Some(&BoundOverride::Numeric {
        min: None,
        max: Some(25),
        default: None
      })
    );
    assert_eq!(settings.tool_overrides["nuclei"].enabled, Some(false));
  }

  #[test]
  fn test_load_missing_file_is_default() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(&dir.path().join("missing.toml")).unwrap();
    assert_eq!(settings, Settings::default());
  }

  #[test]
  fn test_with_data_dir_fills_paths() {
    let settings = Settings::default().with_data_dir(Path::new("/var/lib/reconflow"));
    assert_eq!(
      settings.artifact_dir,
      Some(PathBuf::from("/var/lib/reconflow/artifacts"))
    );
    assert_eq!(
      settings.scratch_dir,
      Some(PathBuf::from("/var/lib/reconflow/scratch"))
    );
  }
}
