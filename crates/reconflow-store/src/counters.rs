use std::time::Duration;

use chrono::Utc;
use reconflow_kv::{CounterFuture, CounterStore};
use sqlx::SqlitePool;

fn backend(e: sqlx::Error) -> reconflow_kv::Error {
  reconflow_kv::Error::Backend(Box::new(e))
}

fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Admission counters in the `admission_counters` table.
///
/// Each operation is a single statement, so concurrent processes sharing the
/// database file see one consistent count.
#[derive(Debug, Clone)]
pub struct SqliteCounterStore {
  pool: SqlitePool,
}

impl SqliteCounterStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }
}

impl CounterStore for SqliteCounterStore {
  fn incr(&self, key: &str, ttl: Duration) -> CounterFuture<'_> {
    let key = key.to_string();
    Box::pin(async move {
      let now = now_millis();
      let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
      // An expired row restarts from one instead of resuming its old count.
      let value: i64 = sqlx::query_scalar(
        r#"
            INSERT INTO admission_counters (key, value, expires_at)
            VALUES (?1, 1, ?2)
            ON CONFLICT (key) DO UPDATE
            SET value = CASE WHEN admission_counters.expires_at <= ?3 THEN 1
                             ELSE admission_counters.value + 1 END,
                expires_at = excluded.expires_at
            RETURNING value
            "#,
      )
      .bind(&key)
      .bind(expires_at)
      .bind(now)
      .fetch_one(&self.pool)
      .await
      .map_err(backend)?;
      Ok(value)
    })
  }

  fn decr(&self, key: &str) -> CounterFuture<'_> {
    let key = key.to_string();
    Box::pin(async move {
      let value: Option<i64> = sqlx::query_scalar(
        r#"
            UPDATE admission_counters
            SET value = MAX(value - 1, 0)
            WHERE key = ?1 AND expires_at > ?2
            RETURNING value
            "#,
      )
      .bind(&key)
      .bind(now_millis())
      .fetch_optional(&self.pool)
      .await
      .map_err(backend)?;
      Ok(value.unwrap_or(0))
    })
  }

  fn get(&self, key: &str) -> CounterFuture<'_> {
    let key = key.to_string();
    Box::pin(async move {
      let value: Option<i64> =
        sqlx::query_scalar("SELECT value FROM admission_counters WHERE key = ? AND expires_at > ?")
          .bind(&key)
          .bind(now_millis())
          .fetch_optional(&self.pool)
          .await
          .map_err(backend)?;
      Ok(value.unwrap_or(0))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::SqliteStore;

  const TTL: Duration = Duration::from_secs(60);

  #[tokio::test]
  async fn test_counts_are_shared_between_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reconflow.db");
    let first = SqliteStore::open(&path).await.unwrap();
    first.migrate().await.unwrap();
    let second = SqliteStore::open(&path).await.unwrap();

    let (a, b) = (first.counters(), second.counters());
    assert_eq!(a.incr("active:user-1", TTL).await.unwrap(), 1);
    assert_eq!(b.incr("active:user-1", TTL).await.unwrap(), 2);
    assert_eq!(a.get("active:user-1").await.unwrap(), 2);

    assert_eq!(b.decr("active:user-1").await.unwrap(), 1);
    assert_eq!(a.decr("active:user-1").await.unwrap(), 0);
    assert_eq!(a.decr("active:user-1").await.unwrap(), 0);
    assert_eq!(b.get("active:user-2").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_expired_counter_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("reconflow.db")).await.unwrap();
    store.migrate().await.unwrap();
    let counters = store.counters();

    counters.incr("active:user-1", Duration::ZERO).await.unwrap();
    counters.incr("active:user-1", Duration::ZERO).await.unwrap();
    assert_eq!(counters.get("active:user-1").await.unwrap(), 0);
    assert_eq!(counters.decr("active:user-1").await.unwrap(), 0);
    assert_eq!(counters.incr("active:user-1", TTL).await.unwrap(), 1);
  }
}
