use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical pipeline stage, used to validate step ordering.
///
/// Stages are ranked; a chain may stay on a stage or move forward but never
/// return to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Discovery = 1,
  Validation = 2,
  Enrichment = 3,
  Prep = 4,
  Scanning = 5,
  Exploitation = 6,
  Reporting = 7,
}

impl Stage {
  /// Map a tool category (or one of its aliases) onto a stage.
  pub fn from_category(category: &str) -> Option<Stage> {
    let stage = match category.trim().to_ascii_lowercase().as_str() {
      "discovery" | "recon" | "subdomain" | "subdomains" | "osint" | "passive" => Stage::Discovery,
      "validation" | "dns" | "resolve" | "probe" | "portscan" | "liveness" => Stage::Validation,
      "enrichment" | "crawl" | "crawler" | "fingerprint" | "tech" | "service" => Stage::Enrichment,
      "prep" | "preparation" | "fuzz" | "content" | "params" | "wordlist" => Stage::Prep,
      "scanning" | "scan" | "vuln" | "vulnerability" | "dast" => Stage::Scanning,
      "exploitation" | "exploit" | "attack" => Stage::Exploitation,
      "reporting" | "report" | "screenshot" | "visual" => Stage::Reporting,
      _ => return None,
    };
    Some(stage)
  }

  pub fn rank(self) -> u8 {
    self as u8
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Stage::Discovery => "discovery",
      Stage::Validation => "validation",
      Stage::Enrichment => "enrichment",
      Stage::Prep => "prep",
      Stage::Scanning => "scanning",
      Stage::Exploitation => "exploitation",
      Stage::Reporting => "reporting",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
