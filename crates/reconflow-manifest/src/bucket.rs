use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// A typed category of discovered artifact shared across the steps of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
  Domains,
  Hosts,
  Ips,
  Ports,
  Services,
  Urls,
  Endpoints,
  Params,
  TechStack,
  Vulns,
  ExploitResults,
  Screenshots,
}

/// Error returned when a bucket name is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown bucket kind: {0}")]
pub struct ParseBucketError(pub String);

impl BucketKind {
  /// Every bucket kind, in canonical order.
  pub const ALL: [BucketKind; 12] = [
    BucketKind::Domains,
    BucketKind::Hosts,
    BucketKind::Ips,
    BucketKind::Ports,
    BucketKind::Services,
    BucketKind::Urls,
    BucketKind::Endpoints,
    BucketKind::Params,
    BucketKind::TechStack,
    BucketKind::Vulns,
    BucketKind::ExploitResults,
    BucketKind::Screenshots,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      BucketKind::Domains => "domains",
      BucketKind::Hosts => "hosts",
      BucketKind::Ips => "ips",
      BucketKind::Ports => "ports",
      BucketKind::Services => "services",
      BucketKind::Urls => "urls",
      BucketKind::Endpoints => "endpoints",
      BucketKind::Params => "params",
      BucketKind::TechStack => "tech_stack",
      BucketKind::Vulns => "vulns",
      BucketKind::ExploitResults => "exploit_results",
      BucketKind::Screenshots => "screenshots",
    }
  }

  /// Normalize a single item for this bucket.
  ///
  /// Returns `None` when the item normalizes to nothing (e.g. blank strings).
  /// Non-string items (structured findings, numeric ports) are kept as-is.
  pub fn normalize(self, item: &Value) -> Option<Value> {
    match item {
      Value::String(raw) => self.normalize_str(raw).map(Value::String),
      Value::Null => None,
      other => Some(other.clone()),
    }
  }

  /// Normalize a string item for this bucket.
  pub fn normalize_str(self, raw: &str) -> Option<String> {
    let normalized = match self {
      BucketKind::Domains => normalize_domain(raw),
      BucketKind::Urls => normalize_url(raw),
      BucketKind::Endpoints => normalize_endpoint(raw),
      _ => raw.trim().to_string(),
    };

    if normalized.is_empty() {
      None
    } else {
      Some(normalized)
    }
  }
}

impl fmt::Display for BucketKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for BucketKind {
  type Err = ParseBucketError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BucketKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s.trim())
      .ok_or_else(|| ParseBucketError(s.to_string()))
  }
}

/// Lowercase, strip leading `*.` labels and trailing dots.
///
/// Applied until a fixed point so that inputs such as `"a. ."` settle.
fn normalize_domain(raw: &str) -> String {
  let mut current = raw.trim().to_lowercase();
  loop {
    let next = current
      .trim()
      .trim_start_matches("*.")
      .trim_end_matches('.')
      .trim();
    if next == current {
      return current;
    }
    current = next.to_string();
  }
}

/// Strip the fragment and lowercase the host.
fn normalize_url(raw: &str) -> String {
  let without_fragment = raw.trim().split('#').next().unwrap_or_default().trim();

  match Url::parse(without_fragment) {
    Ok(mut url) => {
      url.set_fragment(None);
      if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        if lower != host {
          // Only fails for cannot-be-a-base URLs, which have no host anyway.
          let _ = url.set_host(Some(&lower));
        }
      }
      url.to_string()
    }
    Err(_) => without_fragment.to_string(),
  }
}

/// Ensure a leading `/`.
fn normalize_endpoint(raw: &str) -> String {
  let trimmed = raw.trim();
  if trimmed.is_empty() || trimmed.starts_with('/') {
    trimmed.to_string()
  } else {
    format!("/{trimmed}")
  }
}

/// Deduplication key for an item.
pub fn item_key(item: &Value) -> String {
  match item {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Normalize and deduplicate items for a bucket, preserving first-seen order.
pub fn normalize_items<'a>(kind: BucketKind, items: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for item in items {
    if let Some(normalized) = kind.normalize(item)
      && seen.insert(item_key(&normalized))
    {
      out.push(normalized);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_domain_normalization() {
    assert_eq!(
      BucketKind::Domains.normalize_str(" *.Example.COM. "),
      Some("example.com".to_string())
    );
    assert_eq!(
      BucketKind::Domains.normalize_str("*.*.api.example.com"),
      Some("api.example.com".to_string())
    );
    assert_eq!(BucketKind::Domains.normalize_str("   "), None);
  }

  #[test]
  fn test_url_normalization() {
    assert_eq!(
      BucketKind::Urls.normalize_str("https://Example.COM/Path?q=1#section"),
      Some("https://example.com/Path?q=1".to_string())
    );
    assert_eq!(
      BucketKind::Urls.normalize_str("not a url#frag"),
      Some("not a url".to_string())
    );
  }

  #[test]
  fn test_endpoint_normalization() {
    assert_eq!(
      BucketKind::Endpoints.normalize_str("api/v1/users"),
      Some("/api/v1/users".to_string())
    );
    assert_eq!(
      BucketKind::Endpoints.normalize_str(" /login "),
      Some("/login".to_string())
    );
  }

  #[test]
  fn test_other_buckets_trim() {
    assert_eq!(
      BucketKind::Ips.normalize_str(" 10.0.0.1\n"),
      Some("10.0.0.1".to_string())
    );
    assert_eq!(BucketKind::Ports.normalize(&json!(443)), Some(json!(443)));
    assert_eq!(BucketKind::Vulns.normalize(&Value::Null), None);
  }

  #[test]
  fn test_normalization_is_idempotent() {
    let samples = [
      " *.Example.COM. ",
      "a. .",
      "*.",
      "HTTPS://Sub.Example.com:8443/a/b?x=y#top",
      "http://example.com",
      "ftp://Files.Example.org/pub",
      "mailto:Someone@Example.com",
      "relative/path#x",
      "api/v1",
      "//double",
      "  spaced value  ",
      "10.0.0.1",
    ];

    for kind in BucketKind::ALL {
      for sample in samples {
        if let Some(once) = kind.normalize_str(sample) {
          assert_eq!(
            kind.normalize_str(&once),
            Some(once.clone()),
            "{kind} normalization not idempotent for {sample:?}"
          );
        }
      }
    }
  }

  #[test]
  fn test_normalize_items_dedups_in_stable_order() {
    let items = vec![
      json!("b.example.com"),
      json!("*.A.example.com"),
      json!("B.example.com."),
      json!("a.example.com"),
    ];
    let result = normalize_items(BucketKind::Domains, &items);
    assert_eq!(result, vec![json!("b.example.com"), json!("a.example.com")]);
  }

  #[test]
  fn test_bucket_kind_parse_and_serde() {
    assert_eq!("tech_stack".parse::<BucketKind>(), Ok(BucketKind::TechStack));
    assert!("widgets".parse::<BucketKind>().is_err());
    assert_eq!(
      serde_json::to_value(BucketKind::ExploitResults).unwrap(),
      json!("exploit_results")
    );
  }
}
