use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counter backend failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("counter backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Boxed future returned by [`CounterStore`] methods.
pub type CounterFuture<'a> = Pin<Box<dyn Future<Output = Result<i64, Error>> + Send + 'a>>;

/// Trait for shared atomic counters.
///
/// Every increment refreshes the key's expiry, so a counter whose decrements
/// were missed still falls back to zero eventually.
///
/// This trait is async to support networked and database backends.
pub trait CounterStore: Send + Sync {
  /// Increment a counter, refresh its expiry, and return the new value.
  fn incr(&self, key: &str, ttl: Duration) -> CounterFuture<'_>;

  /// Decrement a counter (never below zero) and return the new value.
  fn decr(&self, key: &str) -> CounterFuture<'_>;

  /// Current value of a counter; missing or expired keys read as zero.
  fn get(&self, key: &str) -> CounterFuture<'_>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
  value: i64,
  expires_at: Instant,
}

/// In-memory counter store.
///
/// Suitable for a single process or testing.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
  data: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn live(data: &mut HashMap<String, Counter>, key: &str, now: Instant) -> Option<Counter> {
    match data.get(key) {
      Some(counter) if counter.expires_at > now => Some(*counter),
      Some(_) => {
        data.remove(key);
        None
      }
      None => None,
    }
  }
}

impl CounterStore for MemoryCounterStore {
  fn incr(&self, key: &str, ttl: Duration) -> CounterFuture<'_> {
    let now = Instant::now();
    let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
    let value = Self::live(&mut data, key, now).map_or(0, |c| c.value) + 1;
    data.insert(
      key.to_string(),
      Counter {
        value,
        expires_at: now + ttl,
      },
    );
    Box::pin(async move { Ok(value) })
  }

  fn decr(&self, key: &str) -> CounterFuture<'_> {
    let now = Instant::now();
    let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
    let value = match Self::live(&mut data, key, now) {
      Some(counter) if counter.value > 1 => {
        let value = counter.value - 1;
        data.insert(key.to_string(), Counter { value, ..counter });
        value
      }
      Some(_) => {
        data.remove(key);
        0
      }
      None => 0,
    };
    Box::pin(async move { Ok(value) })
  }

  fn get(&self, key: &str) -> CounterFuture<'_> {
    let now = Instant::now();
    let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
    let value = Self::live(&mut data, key, now).map_or(0, |c| c.value);
    Box::pin(async move { Ok(value) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TTL: Duration = Duration::from_secs(60);

  #[tokio::test]
  async fn test_incr_decr_get() {
    let store = MemoryCounterStore::new();

    assert_eq!(store.get("user:1").await.unwrap(), 0);
    assert_eq!(store.incr("user:1", TTL).await.unwrap(), 1);
    assert_eq!(store.incr("user:1", TTL).await.unwrap(), 2);
    assert_eq!(store.get("user:1").await.unwrap(), 2);

    assert_eq!(store.decr("user:1").await.unwrap(), 1);
    assert_eq!(store.decr("user:1").await.unwrap(), 0);
    assert_eq!(store.get("user:1").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_decr_never_goes_negative() {
    let store = MemoryCounterStore::new();
    assert_eq!(store.decr("user:2").await.unwrap(), 0);
    assert_eq!(store.incr("user:2", TTL).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_expired_counter_reads_zero() {
    let store = MemoryCounterStore::new();
    store.incr("user:3", Duration::ZERO).await.unwrap();
    assert_eq!(store.get("user:3").await.unwrap(), 0);
    assert_eq!(store.incr("user:3", TTL).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_keys_are_independent() {
    let store = MemoryCounterStore::new();
    store.incr("user:a", TTL).await.unwrap();
    assert_eq!(store.get("user:b").await.unwrap(), 0);
  }
}
