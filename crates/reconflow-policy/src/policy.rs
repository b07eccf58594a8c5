use std::collections::BTreeMap;
use std::time::Duration;

use reconflow_config::{BoundOverride, ToolOverride};
use reconflow_manifest::BucketKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::stage::Stage;

/// Default wall-clock budget for a tool without one.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Bounds for a single runtime parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeBound {
  Numeric { min: i64, max: i64, default: i64 },
  Choice { options: Vec<String>, default: String },
}

/// Type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
  String,
  Integer,
  Boolean,
  Choice,
  Text,
}

/// One entry of a tool's ordered parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
  pub name: String,
  pub kind: FieldKind,
  #[serde(default)]
  pub required: bool,
  /// Hidden fields are engine-managed and not shown in workflow editors.
  #[serde(default = "default_visible")]
  pub visible: bool,
}

fn default_visible() -> bool {
  true
}

impl SchemaField {
  pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
    Self {
      name: name.into(),
      kind,
      required: false,
      visible: true,
    }
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn hidden(mut self) -> Self {
    self.visible = false;
    self
  }
}

/// The effective contract of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
  pub slug: String,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub stage: Option<Stage>,
  /// Accepted input buckets, in order of preference.
  #[serde(default)]
  pub consumes: Vec<BucketKind>,
  #[serde(default)]
  pub produces: Vec<BucketKind>,
  pub max_targets: usize,
  pub max_file_bytes: u64,
  pub timeout_secs: u64,
  #[serde(default)]
  pub binary_candidates: Vec<String>,
  #[serde(default)]
  pub runtime: BTreeMap<String, RuntimeBound>,
  #[serde(default)]
  pub schema: Vec<SchemaField>,
  /// False for unknown or disabled tools.
  #[serde(default)]
  pub enabled: bool,
}

impl ToolPolicy {
  /// A baseline policy for a tool in the given category.
  pub fn new(slug: impl Into<String>, category: &str) -> Self {
    Self {
      slug: slug.into(),
      category: Some(category.to_string()),
      stage: Stage::from_category(category),
      consumes: Vec::new(),
      produces: Vec::new(),
      max_targets: 1000,
      max_file_bytes: 10 * 1024 * 1024,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
      binary_candidates: Vec::new(),
      runtime: BTreeMap::new(),
      schema: Vec::new(),
      enabled: true,
    }
  }

  /// The empty-but-valid policy returned for unknown or disabled tools.
  pub fn empty(slug: impl Into<String>) -> Self {
    Self {
      slug: slug.into(),
      category: None,
      stage: None,
      consumes: Vec::new(),
      produces: Vec::new(),
      max_targets: 0,
      max_file_bytes: 0,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
      binary_candidates: Vec::new(),
      runtime: BTreeMap::new(),
      schema: Vec::new(),
      enabled: false,
    }
  }

  pub fn consumes(mut self, kinds: &[BucketKind]) -> Self {
    self.consumes = kinds.to_vec();
    self
  }

  pub fn produces(mut self, kinds: &[BucketKind]) -> Self {
    self.produces = kinds.to_vec();
    self
  }

  pub fn binaries(mut self, names: &[&str]) -> Self {
    self.binary_candidates = names.iter().map(|n| n.to_string()).collect();
    self
  }

  pub fn max_targets(mut self, max_targets: usize) -> Self {
    self.max_targets = max_targets;
    self
  }

  pub fn timeout_secs(mut self, secs: u64) -> Self {
    self.timeout_secs = secs;
    self
  }

  pub fn numeric(mut self, name: &str, min: i64, max: i64, default: i64) -> Self {
    self
      .runtime
      .insert(name.to_string(), RuntimeBound::Numeric { min, max, default });
    self.schema.push(SchemaField::new(name, FieldKind::Integer));
    self
  }

  pub fn choice(mut self, name: &str, options: &[&str], default: &str) -> Self {
    self.runtime.insert(
      name.to_string(),
      RuntimeBound::Choice {
        options: options.iter().map(|o| o.to_string()).collect(),
        default: default.to_string(),
      },
    );
    self.schema.push(SchemaField::new(name, FieldKind::Choice));
    self
  }

  pub fn field(mut self, field: SchemaField) -> Self {
    self.schema.push(field);
    self
  }

  pub fn accepts(&self, kind: BucketKind) -> bool {
    self.consumes.contains(&kind)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  /// Narrow this baseline with an override row.
  ///
  /// Overrides never widen: numeric bounds are clamped into the baseline
  /// range, choices and consumed buckets are intersected with the baseline,
  /// caps take the minimum. An intersection that comes out empty keeps the
  /// baseline list.
  pub fn narrow(&self, row: &ToolOverride) -> ToolPolicy {
    if row.enabled == Some(false) {
      return ToolPolicy::empty(&self.slug);
    }

    let mut policy = self.clone();

    if let Some(max_targets) = row.max_targets {
      policy.max_targets = policy.max_targets.min(max_targets);
    }
    if let Some(max_file_bytes) = row.max_file_bytes {
      policy.max_file_bytes = policy.max_file_bytes.min(max_file_bytes);
    }
    if let Some(timeout_secs) = row.timeout_secs {
      policy.timeout_secs = policy.timeout_secs.min(timeout_secs);
    }
    if !row.binary_candidates.is_empty() {
      policy.binary_candidates = row.binary_candidates.clone();
    }
    if let Some(consumes) = &row.consumes {
      let narrowed: Vec<BucketKind> = self
        .consumes
        .iter()
        .filter(|kind| consumes.contains(kind))
        .copied()
        .collect();
      // An empty list reads as "needs no input", which would widen the tool.
      if narrowed.is_empty() && !self.consumes.is_empty() {
        warn!(tool = %self.slug, "consumes override shares no bucket with baseline, ignored");
      } else {
        policy.consumes = narrowed;
      }
    }

    for (name, bound) in &row.runtime {
      let Some(base) = self.runtime.get(name) else {
        warn!(tool = %self.slug, param = %name, "override for unknown runtime parameter ignored");
        continue;
      };
      match narrow_bound(base, bound) {
        Some(narrowed) => {
          policy.runtime.insert(name.clone(), narrowed);
        }
        None => {
          warn!(tool = %self.slug, param = %name, "override kind does not match baseline, ignored");
        }
      }
    }

    policy
  }

  /// Fill defaults, clamp numerics and replace invalid choices with the
  /// default. Parameters without bounds pass through unchanged.
  pub fn apply_runtime(&self, params: &Map<String, Value>) -> Map<String, Value> {
    let mut out = params.clone();

    for (name, bound) in &self.runtime {
      let value = match bound {
        RuntimeBound::Numeric { min, max, default } => {
          let requested = params.get(name).and_then(as_i64).unwrap_or(*default);
          Value::from(requested.clamp(*min, *max))
        }
        RuntimeBound::Choice { options, default } => match params.get(name).and_then(Value::as_str) {
          Some(choice) if options.iter().any(|o| o == choice) => Value::String(choice.to_string()),
          _ => Value::String(default.clone()),
        },
      };
      out.insert(name.clone(), value);
    }

    out
  }

  /// Required schema fields absent (or blank) in `params`.
  pub fn missing_required<'a>(&'a self, params: &Map<String, Value>) -> Vec<&'a str> {
    self
      .schema
      .iter()
      .filter(|field| field.required)
      .filter(|field| match params.get(&field.name) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
      })
      .map(|field| field.name.as_str())
      .collect()
  }
}

fn as_i64(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn narrow_bound(base: &RuntimeBound, row: &BoundOverride) -> Option<RuntimeBound> {
  match (base, row) {
    (
      RuntimeBound::Numeric { min, max, default },
      BoundOverride::Numeric {
        min: o_min,
        max: o_max,
        default: o_default,
      },
    ) => {
      let new_min = o_min.unwrap_or(*min).clamp(*min, *max);
      let new_max = o_max.unwrap_or(*max).clamp(*min, *max).max(new_min);
      let new_default = o_default.unwrap_or(*default).clamp(new_min, new_max);
      Some(RuntimeBound::Numeric {
        min: new_min,
        max: new_max,
        default: new_default,
      })
    }
    (
      RuntimeBound::Choice { options, default },
      BoundOverride::Choice {
        options: o_options,
        default: o_default,
      },
    ) => {
      let narrowed: Vec<String> = options
        .iter()
        .filter(|option| o_options.contains(option))
        .cloned()
        .collect();
      if narrowed.is_empty() {
        return Some(base.clone());
      }
      let new_default = [o_default.as_ref(), Some(default)]
        .into_iter()
        .flatten()
        .find(|candidate| narrowed.contains(candidate))
        .cloned()
        .unwrap_or_else(|| narrowed[0].clone());
      Some(RuntimeBound::Choice {
        options: narrowed,
        default: new_default,
      })
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn nuclei() -> ToolPolicy {
    ToolPolicy::new("nuclei", "vuln")
      .consumes(&[BucketKind::Urls, BucketKind::Hosts])
      .produces(&[BucketKind::Vulns])
      .max_targets(500)
      .numeric("rate_limit", 1, 500, 150)
      .choice("severity", &["info", "low", "medium", "high", "critical"], "medium")
  }

  #[test]
  fn test_numeric_override_is_clamped_into_baseline() {
    let mut row = ToolOverride::default();
    row.runtime.insert(
      "rate_limit".to_string(),
      BoundOverride::Numeric {
        min: Some(-10),
        max: Some(10_000),
        default: Some(9_999),
      },
    );

    let policy = nuclei().narrow(&row);
    assert_eq!(
      policy.runtime.get("rate_limit"),
      Some(&RuntimeBound::Numeric {
        min: 1,
        max: 500,
        default: 500
      })
    );
  }

  #[test]
  fn test_numeric_override_keeps_min_below_max() {
    let mut row = ToolOverride::default();
    row.runtime.insert(
      "rate_limit".to_string(),
      BoundOverride::Numeric {
        min: Some(300),
        max: Some(100),
        default: None,
      },
    );

    let policy = nuclei().narrow(&row);
    assert_eq!(
      policy.runtime.get("rate_limit"),
      Some(&RuntimeBound::Numeric {
        min: 300,
        max: 300,
        default: 300
      })
    );
  }

  #[test]
  fn test_choice_override_only_subsets() {
    let mut row = ToolOverride::default();
    row.runtime.insert(
      "severity".to_string(),
      BoundOverride::Choice {
        options: vec!["high".to_string(), "critical".to_string(), "extreme".to_string()],
        default: Some("extreme".to_string()),
      },
    );

    let policy = nuclei().narrow(&row);
    assert_eq!(
      policy.runtime.get("severity"),
      Some(&RuntimeBound::Choice {
        options: vec!["high".to_string(), "critical".to_string()],
        default: "high".to_string()
      })
    );
  }

  #[test]
  fn test_caps_and_consumes_narrow() {
    let row = ToolOverride {
      max_targets: Some(10_000),
      timeout_secs: Some(30),
      consumes: Some(vec![BucketKind::Urls, BucketKind::Ports]),
      ..Default::default()
    };

    let policy = nuclei().narrow(&row);
    assert_eq!(policy.max_targets, 500);
    assert_eq!(policy.timeout_secs, 30);
    assert_eq!(policy.consumes, vec![BucketKind::Urls]);
  }

  #[test]
  fn test_disjoint_consumes_override_keeps_baseline() {
    let row = ToolOverride {
      consumes: Some(vec![BucketKind::Ports]),
      ..Default::default()
    };

    let policy = nuclei().narrow(&row);
    assert_eq!(policy.consumes, vec![BucketKind::Urls, BucketKind::Hosts]);
    assert!(policy.enabled);
  }

  #[test]
  fn test_disabled_override_yields_empty_policy() {
    let row = ToolOverride {
      enabled: Some(false),
      ..Default::default()
    };
    let policy = nuclei().narrow(&row);
    assert!(!policy.enabled);
    assert!(policy.consumes.is_empty());
    assert_eq!(policy.slug, "nuclei");
  }

  #[test]
  fn test_apply_runtime_fills_and_clamps() {
    let params = json!({ "rate_limit": "9000", "severity": "bogus", "args": ["-silent"] });
    let applied = nuclei().apply_runtime(params.as_object().unwrap());

    assert_eq!(applied.get("rate_limit"), Some(&json!(500)));
    assert_eq!(applied.get("severity"), Some(&json!("medium")));
    assert_eq!(applied.get("args"), Some(&json!(["-silent"])));

    let defaults = nuclei().apply_runtime(&Map::new());
    assert_eq!(defaults.get("rate_limit"), Some(&json!(150)));
  }

  #[test]
  fn test_missing_required_fields() {
    let policy = ToolPolicy::new("ffuf", "fuzz").field(SchemaField::new("wordlist", FieldKind::String).required());

    let missing = policy.missing_required(json!({ "wordlist": " " }).as_object().unwrap());
    assert_eq!(missing, vec!["wordlist"]);

    let present = policy.missing_required(json!({ "wordlist": "/w.txt" }).as_object().unwrap());
    assert!(present.is_empty());
  }
}
