//! Heuristic bucketization of free-form target lists.
//!
//! Manual inputs, server-side target files, and global seeds arrive as plain
//! text. Each value is classified by shape: URL-shaped values go to `urls`,
//! IP-shaped values (including CIDR ranges) to `ips`, and everything else is
//! treated as a domain or host name.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::bucket::BucketKind;

/// Split free-form text into candidate values.
///
/// Lines starting with `#` are comments. Remaining lines are split on commas
/// and whitespace.
pub fn split_values(text: &str) -> Vec<&str> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && !line.starts_with('#'))
    .flat_map(|line| line.split(|c: char| c == ',' || c.is_whitespace()))
    .filter(|value| !value.is_empty())
    .collect()
}

/// Classify a single value by its shape.
pub fn classify(value: &str) -> BucketKind {
  let value = value.trim();
  if value.contains("://") {
    BucketKind::Urls
  } else if is_ip_shaped(value) {
    BucketKind::Ips
  } else {
    BucketKind::Domains
  }
}

fn is_ip_shaped(value: &str) -> bool {
  match value.split_once('/') {
    Some((addr, prefix)) => addr.parse::<IpAddr>().is_ok() && prefix.parse::<u8>().is_ok(),
    None => value.parse::<IpAddr>().is_ok(),
  }
}

/// Bucketize free-form text, keeping only buckets in `accepted`.
///
/// Domain-shaped values land in `domains` when accepted, otherwise in `hosts`.
/// Values are normalized but not yet deduplicated.
pub fn bucketize(text: &str, accepted: &[BucketKind]) -> BTreeMap<BucketKind, Vec<String>> {
  let mut out: BTreeMap<BucketKind, Vec<String>> = BTreeMap::new();

  for value in split_values(text) {
    let kind = match classify(value) {
      BucketKind::Domains if !accepted.contains(&BucketKind::Domains) => BucketKind::Hosts,
      kind => kind,
    };

    if !accepted.contains(&kind) {
      continue;
    }

    if let Some(normalized) = kind.normalize_str(value) {
      out.entry(kind).or_default().push(normalized);
    }
  }

  out
}
