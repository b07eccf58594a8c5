use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{AdapterError, AdapterOptions, AdapterResult, FailureReason, ToolAdapter};

/// Search PATH for a binary.
pub fn which(name: &str) -> Option<PathBuf> {
  let path_var = std::env::var_os("PATH")?;
  std::env::split_paths(&path_var)
    .map(|dir| dir.join(name))
    .find(|candidate| candidate.is_file())
}

/// Runs a tool's binary as a child process.
///
/// Targets are written to stdin one per line; each non-empty stdout line
/// becomes an item of the tool's first produced bucket. Extra arguments come
/// from `params.args` (an array of strings or a whitespace-separated string).
#[derive(Debug, Default, Clone)]
pub struct CommandAdapter;

impl CommandAdapter {
  pub fn new() -> Self {
    Self
  }

  fn args(options: &AdapterOptions) -> Vec<String> {
    match options.params.get("args") {
      Some(Value::Array(items)) => items
        .iter()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect(),
      Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
      _ => Vec::new(),
    }
  }
}

#[async_trait]
impl ToolAdapter for CommandAdapter {
  async fn run(&self, options: AdapterOptions) -> Result<AdapterResult, AdapterError> {
    let candidates = &options.policy.binary_candidates;
    let Some(binary) = candidates.iter().find_map(|name| which(name)) else {
      return Ok(AdapterResult::error(
        FailureReason::NotInstalled,
        format!("none of [{}] found on PATH", candidates.join(", ")),
      ));
    };

    tokio::fs::create_dir_all(&options.scratch_dir).await?;
    let args = Self::args(&options);
    let command_line = format!("{} {}", binary.display(), args.join(" "));
    debug!(tool = %options.tool_slug, command = %command_line, "spawning tool");

    let mut child = Command::new(&binary)
      .args(&args)
      .current_dir(&options.scratch_dir)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    let input = options.target_lines().join("\n") + "\n";
    if let Some(mut stdin) = child.stdin.take() {
      tokio::spawn(async move {
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
          debug!(error = %e, "tool closed stdin early");
        }
      });
    }

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let output_file = options.scratch_dir.join(format!("{}.out", options.tool_slug));
    if let Err(e) = tokio::fs::write(&output_file, &output.stdout).await {
      warn!(tool = %options.tool_slug, error = %e, "failed to write tool output file");
    }

    let raw_output = if stderr.is_empty() {
      stdout.clone()
    } else {
      format!("{stdout}\n{stderr}")
    };

    let mut result = if output.status.success() {
      let mut result = AdapterResult::ok(format!("{} finished", options.tool_slug));
      if let Some(kind) = options.policy.produces.first() {
        let items: Vec<Value> = stdout
          .lines()
          .map(str::trim)
          .filter(|line| !line.is_empty())
          .map(|line| Value::String(line.to_string()))
          .collect();
        result = result.with_bucket(*kind, items);
      }
      result
    } else {
      AdapterResult::error(
        FailureReason::AdapterError,
        format!("{} exited with {}", options.tool_slug, output.status),
      )
    };

    result.diagnostics.command = Some(command_line);
    result.diagnostics.exit_code = output.status.code();
    Ok(
      result
        .with_raw_output(raw_output)
        .with_output_file(output_file),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reconflow_manifest::BucketKind;
  use reconflow_policy::ToolPolicy;
  use serde_json::json;
  use std::collections::BTreeMap;

  fn options(policy: ToolPolicy, scratch: PathBuf) -> AdapterOptions {
    let mut inputs = BTreeMap::new();
    inputs.insert(BucketKind::Domains, vec![json!("a.example.com"), json!("b.example.com")]);
    AdapterOptions {
      run_id: "run-1".to_string(),
      step_index: 0,
      tool_slug: policy.slug.clone(),
      policy,
      params: serde_json::Map::new(),
      inputs,
      scratch_dir: scratch,
    }
  }

  #[tokio::test]
  async fn test_missing_binary_is_not_installed() {
    let dir = tempfile::tempdir().unwrap();
    let policy = ToolPolicy::new("ghost", "probe")
      .consumes(&[BucketKind::Domains])
      .binaries(&["reconflow-no-such-binary"]);

    let result = CommandAdapter::new()
      .run(options(policy, dir.path().to_path_buf()))
      .await
      .unwrap();
    assert!(!result.is_ok());
    assert_eq!(result.error_reason, Some(FailureReason::NotInstalled));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_stdout_lines_become_first_produced_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let policy = ToolPolicy::new("echoer", "probe")
      .consumes(&[BucketKind::Domains])
      .produces(&[BucketKind::Hosts, BucketKind::Ips])
      .binaries(&["cat"]);

    let result = CommandAdapter::new()
      .run(options(policy, dir.path().join("step")))
      .await
      .unwrap();

    assert!(result.is_ok(), "{}", result.message);
    assert_eq!(
      result.buckets.get(&BucketKind::Hosts),
      Some(&vec![json!("a.example.com"), json!("b.example.com")])
    );
    assert!(!result.buckets.contains_key(&BucketKind::Ips));

    let output_file = result.output_file.unwrap();
    assert_eq!(output_file, dir.path().join("step/echoer.out"));
    assert!(output_file.exists());
  }

  #[test]
  fn test_args_from_params() {
    let dir = PathBuf::from("/tmp");
    let mut opts = options(ToolPolicy::new("x", "probe"), dir);
    opts.params.insert("args".to_string(), json!(["-silent", "-json"]));
    assert_eq!(CommandAdapter::args(&opts), vec!["-silent", "-json"]);

    opts.params.insert("args".to_string(), json!("-c 10  -v"));
    assert_eq!(CommandAdapter::args(&opts), vec!["-c", "10", "-v"]);
  }
}
