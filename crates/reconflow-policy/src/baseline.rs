use std::collections::BTreeMap;

use reconflow_manifest::BucketKind::{self, *};

use crate::policy::{FieldKind, SchemaField, ToolPolicy};

/// The built-in policy for every known tool.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
  tools: BTreeMap<String, ToolPolicy>,
}

impl Baseline {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add or replace a tool's baseline.
  pub fn with_tool(mut self, policy: ToolPolicy) -> Self {
    self.tools.insert(policy.slug.clone(), policy);
    self
  }

  pub fn get(&self, slug: &str) -> Option<&ToolPolicy> {
    self.tools.get(slug)
  }

  pub fn slugs(&self) -> impl Iterator<Item = &str> {
    self.tools.keys().map(String::as_str)
  }

  /// The tools shipped with the engine.
  pub fn builtin() -> Self {
    const HOSTISH: &[BucketKind] = &[Domains, Hosts, Ips];

    Self::new()
      .with_tool(
        ToolPolicy::new("subfinder", "subdomain")
          .consumes(&[Domains])
          .produces(&[Domains])
          .binaries(&["subfinder"])
          .max_targets(200)
          .numeric("threads", 1, 100, 10),
      )
      .with_tool(
        ToolPolicy::new("amass", "subdomain")
          .consumes(&[Domains])
          .produces(&[Domains, Ips])
          .binaries(&["amass"])
          .max_targets(50)
          .timeout_secs(1800)
          .choice("mode", &["passive", "active"], "passive"),
      )
      .with_tool(
        ToolPolicy::new("dnsx", "dns")
          .consumes(&[Domains, Hosts])
          .produces(&[Hosts, Ips])
          .binaries(&["dnsx"])
          .numeric("threads", 1, 200, 50),
      )
      .with_tool(
        ToolPolicy::new("naabu", "portscan")
          .consumes(HOSTISH)
          .produces(&[Ports, Services])
          .binaries(&["naabu"])
          .max_targets(500)
          .timeout_secs(1800)
          .numeric("rate", 100, 10_000, 1000)
          .choice("top_ports", &["100", "1000", "full"], "100"),
      )
      .with_tool(
        ToolPolicy::new("httpx", "probe")
          .consumes(&[Domains, Hosts, Ips, Urls])
          .produces(&[Urls, TechStack])
          .binaries(&["httpx", "httpx-toolkit"])
          .numeric("threads", 1, 150, 50)
          .numeric("timeout", 1, 60, 10),
      )
      .with_tool(
        ToolPolicy::new("nmap", "service")
          .consumes(HOSTISH)
          .produces(&[Ports, Services])
          .binaries(&["nmap"])
          .max_targets(256)
          .timeout_secs(3600)
          .choice("timing", &["T2", "T3", "T4"], "T3"),
      )
      .with_tool(
        ToolPolicy::new("katana", "crawl")
          .consumes(&[Urls])
          .produces(&[Urls, Endpoints])
          .binaries(&["katana"])
          .max_targets(200)
          .numeric("depth", 1, 5, 2),
      )
      .with_tool(
        ToolPolicy::new("whatweb", "fingerprint")
          .consumes(&[Urls])
          .produces(&[TechStack])
          .binaries(&["whatweb"])
          .choice("aggression", &["1", "3"], "1"),
      )
      .with_tool(
        ToolPolicy::new("arjun", "params")
          .consumes(&[Urls, Endpoints])
          .produces(&[Params])
          .binaries(&["arjun"])
          .max_targets(100),
      )
      .with_tool(
        ToolPolicy::new("ffuf", "fuzz")
          .consumes(&[Urls])
          .produces(&[Urls, Endpoints])
          .binaries(&["ffuf"])
          .max_targets(20)
          .numeric("threads", 1, 100, 40)
          .field(SchemaField::new("wordlist", FieldKind::String).required()),
      )
      .with_tool(
        ToolPolicy::new("nuclei", "vuln")
          .consumes(&[Urls, Hosts, Domains])
          .produces(&[Vulns])
          .binaries(&["nuclei"])
          .max_targets(500)
          .timeout_secs(3600)
          .numeric("rate_limit", 1, 500, 150)
          .choice("severity", &["info", "low", "medium", "high", "critical"], "medium"),
      )
      .with_tool(
        ToolPolicy::new("sqlmap", "exploit")
          .consumes(&[Urls, Params])
          .produces(&[ExploitResults])
          .binaries(&["sqlmap", "sqlmap.py"])
          .max_targets(10)
          .timeout_secs(3600)
          .numeric("level", 1, 5, 1)
          .numeric("risk", 1, 3, 1),
      )
      .with_tool(
        ToolPolicy::new("gowitness", "screenshot")
          .consumes(&[Urls])
          .produces(&[Screenshots])
          .binaries(&["gowitness"])
          .max_targets(200)
          .field(SchemaField::new("output_dir", FieldKind::String).hidden()),
      )
  }
}
