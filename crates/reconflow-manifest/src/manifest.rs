use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bucket::{BucketKind, item_key, normalize_items};

/// Records which step and tool first contributed an item to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
  pub item: String,
  pub step_index: usize,
  pub tool_slug: String,
}

/// Per-step summary kept in the run manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
  pub tool_slug: String,
  pub status: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_reason: Option<String>,
  /// Number of new items this step added, per bucket.
  #[serde(default)]
  pub added: BTreeMap<BucketKind, usize>,
  /// Items the step returned that were already present.
  #[serde(default)]
  pub duplicates: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifact: Option<String>,
}

/// Result of merging a step's buckets into the run manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
  pub added: BTreeMap<BucketKind, usize>,
  pub duplicates: usize,
}

impl MergeOutcome {
  pub fn total_added(&self) -> usize {
    self.added.values().sum()
  }
}

/// The run-level manifest: aggregated buckets, global seeds, provenance and
/// per-step summaries.
///
/// Provenance follows a first-contributor policy: an entry is recorded once,
/// when the item first enters its bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
  #[serde(default)]
  pub buckets: BTreeMap<BucketKind, Vec<Value>>,
  #[serde(default)]
  pub seeds: BTreeMap<BucketKind, Vec<Value>>,
  #[serde(default)]
  pub provenance: BTreeMap<BucketKind, Vec<Provenance>>,
  #[serde(default)]
  pub steps: BTreeMap<usize, StepSummary>,
}

impl RunManifest {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a manifest with the given global seeds (normalized and deduplicated).
  pub fn with_seeds(seeds: BTreeMap<BucketKind, Vec<String>>) -> Self {
    let mut manifest = Self::new();
    for (kind, values) in seeds {
      let values: Vec<Value> = values.into_iter().map(Value::String).collect();
      let normalized = normalize_items(kind, &values);
      if !normalized.is_empty() {
        manifest.seeds.insert(kind, normalized);
      }
    }
    manifest
  }

  /// Aggregated items for a bucket.
  pub fn bucket(&self, kind: BucketKind) -> &[Value] {
    self.buckets.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// Global seed items for a bucket.
  pub fn seeds(&self, kind: BucketKind) -> &[Value] {
    self.seeds.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
  }

  /// Whether the bucket currently holds at least one item, from steps or seeds.
  pub fn is_available(&self, kind: BucketKind) -> bool {
    !self.bucket(kind).is_empty() || !self.seeds(kind).is_empty()
  }

  /// Merge one bucket's items from a step.
  ///
  /// Items are normalized; new items are appended in stable order and get a
  /// provenance entry, items already present count as duplicates.
  pub fn merge(
    &mut self,
    step_index: usize,
    tool_slug: &str,
    kind: BucketKind,
    items: &[Value],
  ) -> (usize, usize) {
    let bucket = self.buckets.entry(kind).or_default();
    let mut seen: HashSet<String> = bucket.iter().map(item_key).collect();
    let provenance = self.provenance.entry(kind).or_default();

    let mut added = 0;
    let mut duplicates = 0;
    for item in items {
      let Some(normalized) = kind.normalize(item) else {
        continue;
      };
      let key = item_key(&normalized);
      if seen.insert(key.clone()) {
        bucket.push(normalized);
        provenance.push(Provenance {
          item: key,
          step_index,
          tool_slug: tool_slug.to_string(),
        });
        added += 1;
      } else {
        duplicates += 1;
      }
    }

    if bucket.is_empty() {
      self.buckets.remove(&kind);
    }
    if self.provenance.get(&kind).is_some_and(|p| p.is_empty()) {
      self.provenance.remove(&kind);
    }

    (added, duplicates)
  }

  /// Merge every bucket returned by a step.
  pub fn merge_all(
    &mut self,
    step_index: usize,
    tool_slug: &str,
    buckets: &BTreeMap<BucketKind, Vec<Value>>,
  ) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for (kind, items) in buckets {
      let (added, duplicates) = self.merge(step_index, tool_slug, *kind, items);
      if added > 0 {
        outcome.added.insert(*kind, added);
      }
      outcome.duplicates += duplicates;
    }
    outcome
  }

  /// First contributor of an item, if known.
  pub fn contributor(&self, kind: BucketKind, item: &Value) -> Option<&Provenance> {
    let normalized = kind.normalize(item)?;
    let key = item_key(&normalized);
    self
      .provenance
      .get(&kind)?
      .iter()
      .find(|entry| entry.item == key)
  }

  /// Record (or replace) the summary for a step.
  pub fn record_step(&mut self, step_index: usize, summary: StepSummary) {
    self.steps.insert(step_index, summary);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_overlapping_items_leave_one_distinct_entry() {
    let mut manifest = RunManifest::new();

    let (added, dups) = manifest.merge(
      0,
      "subfinder",
      BucketKind::Domains,
      &[json!("Example.com"), json!("api.example.com")],
    );
    assert_eq!((added, dups), (2, 0));

    let (added, dups) = manifest.merge(
      1,
      "amass",
      BucketKind::Domains,
      &[json!("*.example.com."), json!("dev.example.com")],
    );
    assert_eq!((added, dups), (1, 1));

    assert_eq!(
      manifest.bucket(BucketKind::Domains),
      &[
        json!("example.com"),
        json!("api.example.com"),
        json!("dev.example.com")
      ]
    );
  }

  #[test]
  fn test_provenance_records_first_contributor_only() {
    let mut manifest = RunManifest::new();
    manifest.merge(0, "subfinder", BucketKind::Domains, &[json!("example.com")]);
    manifest.merge(1, "amass", BucketKind::Domains, &[json!("EXAMPLE.com")]);

    let provenance = manifest.provenance.get(&BucketKind::Domains).unwrap();
    assert_eq!(provenance.len(), 1);

    let contributor = manifest
      .contributor(BucketKind::Domains, &json!("example.com"))
      .unwrap();
    assert_eq!(contributor.step_index, 0);
    assert_eq!(contributor.tool_slug, "subfinder");
  }

  #[test]
  fn test_merge_all_reports_outcome() {
    let mut manifest = RunManifest::new();
    let mut buckets = BTreeMap::new();
    buckets.insert(
      BucketKind::Urls,
      vec![json!("https://a.test/#x"), json!("https://A.test/")],
    );
    buckets.insert(BucketKind::Ports, vec![json!(80), json!(443), json!(80)]);

    let outcome = manifest.merge_all(2, "httpx", &buckets);
    assert_eq!(outcome.added.get(&BucketKind::Urls), Some(&1));
    assert_eq!(outcome.added.get(&BucketKind::Ports), Some(&2));
    assert_eq!(outcome.duplicates, 2);
    assert_eq!(outcome.total_added(), 3);
  }

  #[test]
  fn test_empty_merge_leaves_no_bucket() {
    let mut manifest = RunManifest::new();
    manifest.merge(0, "nmap", BucketKind::Ports, &[json!(null), json!("  ")]);
    assert!(!manifest.buckets.contains_key(&BucketKind::Ports));
    assert!(!manifest.is_available(BucketKind::Ports));
  }

  #[test]
  fn test_seeds_count_as_available() {
    let mut seeds = BTreeMap::new();
    seeds.insert(BucketKind::Domains, vec!["Example.com".to_string()]);
    let manifest = RunManifest::with_seeds(seeds);

    assert!(manifest.is_available(BucketKind::Domains));
    assert!(manifest.bucket(BucketKind::Domains).is_empty());
    assert_eq!(manifest.seeds(BucketKind::Domains), &[json!("example.com")]);
  }

  #[test]
  fn test_manifest_serde_round_trip() {
    let mut manifest = RunManifest::new();
    manifest.merge(0, "subfinder", BucketKind::Domains, &[json!("example.com")]);
    manifest.record_step(
      0,
      StepSummary {
        tool_slug: "subfinder".to_string(),
        status: "completed".to_string(),
        ..Default::default()
      },
    );

    let encoded = serde_json::to_string(&manifest).unwrap();
    let decoded: RunManifest = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, manifest);
  }
}
