//! # Universe Cache
//!
//! TTL cache for fund universes, owned and injected by the host. The caller
//! passes the current [`Instant`] on every call, so expiry is deterministic under test.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

use crate::types::FundRecord;

#[derive(Debug, Clone)]
struct CacheEntry {
  funds: Arc<Vec<FundRecord>>,
  loaded_at: Instant,
}

impl CacheEntry {
  fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(self.loaded_at) < ttl
  }
}

/// Fund universes keyed by catalog name.
#[derive(Debug)]
pub struct UniverseCache {
  entries: RwLock<HashMap<String, CacheEntry>>,
  ttl: Duration,
}

impl UniverseCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
      ttl,
    }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Cached universe for `key` if it is still fresh at `now`.
  pub fn get(&self, key: &str, now: Instant) -> Option<Arc<Vec<FundRecord>>> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries
      .get(key)
      .filter(|entry| entry.is_fresh(now, self.ttl))
      .map(|entry| Arc::clone(&entry.funds))
  }

  pub fn insert(&self, key: &str, funds: Vec<FundRecord>, now: Instant) -> Arc<Vec<FundRecord>> {
    let funds = Arc::new(funds);
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.insert(
      key.to_string(),
      CacheEntry {
        funds: Arc::clone(&funds),
        loaded_at: now,
      },
    );
    funds
  }

  /// Return the fresh entry or call `loader` and cache its result. Loader errors are not cached.
  pub fn get_or_load<F, E>(
    &self,
    key: &str,
    now: Instant,
    loader: F,
  ) -> Result<Arc<Vec<FundRecord>>, E>
  where
    F: FnOnce() -> Result<Vec<FundRecord>, E>,
  {
    if let Some(funds) = self.get(key, now) {
      return Ok(funds);
    }

    debug!(key, "universe cache miss");
    let funds = loader()?;
    Ok(self.insert(key, funds, now))
  }

  pub fn invalidate(&self, key: &str) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.remove(key);
  }

  /// Drop entries that are stale at `now`.
  pub fn purge_expired(&self, now: Instant) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.retain(|_, entry| entry.is_fresh(now, self.ttl));
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::synthetic::demo_universe;

  #[test]
  fn loader_runs_once_within_ttl() {
    let cache = UniverseCache::new(Duration::from_secs(60));
    let t0 = Instant::now();
    let calls = Cell::new(0);
    let load = || -> Result<Vec<FundRecord>, ()> {
      calls.set(calls.get() + 1);
      Ok(demo_universe(5, 1))
    };

    let a = cache.get_or_load("catalog", t0, load).unwrap();
    let b = cache
      .get_or_load("catalog", t0 + Duration::from_secs(30), load)
      .unwrap();

    assert_eq!(calls.get(), 1);
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[test]
  fn stale_entries_are_reloaded() {
    let cache = UniverseCache::new(Duration::from_secs(60));
    let t0 = Instant::now();
    cache.insert("catalog", demo_universe(3, 1), t0);

    assert!(cache.get("catalog", t0 + Duration::from_secs(59)).is_some());
    assert!(cache.get("catalog", t0 + Duration::from_secs(60)).is_none());

    let reloaded = cache
      .get_or_load("catalog", t0 + Duration::from_secs(61), || {
        Ok::<_, ()>(demo_universe(4, 2))
      })
      .unwrap();
    assert_eq!(reloaded.len(), 4);
  }

  #[test]
  fn failed_loads_are_not_cached() {
    let cache = UniverseCache::new(Duration::from_secs(60));
    let t0 = Instant::now();

    let err = cache.get_or_load("catalog", t0, || Err::<Vec<FundRecord>, _>("offline"));
    assert_eq!(err.unwrap_err(), "offline");
    assert!(cache.is_empty());
  }

  #[test]
  fn invalidate_and_purge_remove_entries() {
    let cache = UniverseCache::new(Duration::from_secs(10));
    let t0 = Instant::now();
    cache.insert("a", demo_universe(2, 1), t0);
    cache.insert("b", demo_universe(2, 2), t0 + Duration::from_secs(8));

    cache.invalidate("a");
    assert_eq!(cache.len(), 1);

    cache.purge_expired(t0 + Duration::from_secs(20));
    assert!(cache.is_empty());
  }
}
