use std::sync::Arc;
use std::time::Duration;

use reconflow_kv::{CounterStore, Error};
use tracing::debug;

/// Caps concurrently active runs per user.
///
/// Each user has a counter in a shared store. Admission increments it and
/// backs out when the cap is exceeded; any terminal transition of an active
/// run decrements it. The counter's expiry is a safety net for missed
/// decrements.
#[derive(Clone)]
pub struct AdmissionController {
  counters: Arc<dyn CounterStore>,
  max_active: u32,
  ttl: Duration,
}

impl AdmissionController {
  pub fn new(counters: Arc<dyn CounterStore>, max_active: u32, ttl: Duration) -> Self {
    Self {
      counters,
      max_active: max_active.max(1),
      ttl,
    }
  }

  fn key(user_id: &str) -> String {
    format!("workflow:active:{user_id}")
  }

  pub fn max_active(&self) -> u32 {
    self.max_active
  }

  /// Try to take a slot for the user.
  pub async fn try_acquire(&self, user_id: &str) -> Result<bool, Error> {
    let key = Self::key(user_id);
    let active = self.counters.incr(&key, self.ttl).await?;
    if active > i64::from(self.max_active) {
      self.counters.decr(&key).await?;
      debug!(user_id = %user_id, active = active - 1, "user at active-run cap");
      return Ok(false);
    }
    Ok(true)
  }

  /// Return a slot.
  pub async fn release(&self, user_id: &str) -> Result<(), Error> {
    self.counters.decr(&Self::key(user_id)).await?;
    Ok(())
  }

  /// Current number of active runs for the user.
  pub async fn active(&self, user_id: &str) -> Result<i64, Error> {
    self.counters.get(&Self::key(user_id)).await
  }
}
