use std::fmt;

use serde::{Deserialize, Serialize};

/// Categorized cause of a step or run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
  /// Bad or missing step input.
  InvalidParams,
  /// Required external binary or adapter is absent.
  NotInstalled,
  /// Wall-clock budget exceeded.
  Timeout,
  /// The adapter panicked or returned an unexpected error.
  AdapterCrash,
  /// The tool ran and reported failure.
  AdapterError,
  /// Stage-order violation detected before dispatch.
  Preflight,
  /// Run stalled past the reconciler horizon.
  Zombie,
  Canceled,
}

impl FailureReason {
  pub fn as_str(self) -> &'static str {
    match self {
      FailureReason::InvalidParams => "INVALID_PARAMS",
      FailureReason::NotInstalled => "NOT_INSTALLED",
      FailureReason::Timeout => "TIMEOUT",
      FailureReason::AdapterCrash => "ADAPTER_CRASH",
      FailureReason::AdapterError => "ADAPTER_ERROR",
      FailureReason::Preflight => "PREFLIGHT",
      FailureReason::Zombie => "ZOMBIE",
      FailureReason::Canceled => "CANCELED",
    }
  }
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
