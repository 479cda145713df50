//! Tiered get-or-compute cache.
//!
//! Tiers are consulted from fastest to slowest. The first live entry wins and is
//! copied into the faster tiers that missed it, keeping its original expiry. A miss
//! everywhere runs the computation once for this caller and writes the serialized
//! result to every available tier. Concurrent misses for the same key may each
//! compute; the last write wins.
//!
//! A tier that fails or reports itself unavailable is skipped, never fatal. [`CacheFacade::stats`]
//! reflects it through the `<tier>_available` flags.
use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use edgelake_core::{
    config::CacheConfig,
    util::{Clock, SystemClock},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

mod tier;
pub use tier::{CacheTier, EntryId, FileTier, MemoryTier, StoredEntry};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cache lock poisoned")]
    Poisoned,
}

#[derive(Clone)]
pub struct CacheFacade {
    tiers: Vec<Arc<dyn CacheTier>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStats {
    pub name: &'static str,
    pub available: bool,
    pub entry_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub cache_name: Option<String>,
    /// Distinct live keys across every reachable tier.
    pub entry_count: usize,
    pub tiers: Vec<TierStats>,
}

impl CacheStats {
    pub fn to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(
            "cache_name".to_string(),
            self.cache_name.clone().map_or(Value::Null, Value::String),
        );
        out.insert("entry_count".to_string(), self.entry_count.into());
        let mut tiers = Map::new();
        for tier in &self.tiers {
            out.insert(format!("{}_available", tier.name), tier.available.into());
            tiers.insert(
                tier.name.to_string(),
                serde_json::json!({
                    "available": tier.available,
                    "entry_count": tier.entry_count,
                }),
            );
        }
        out.insert("tiers".to_string(), Value::Object(tiers));
        out
    }
}

pub struct CacheBuilder {
    tiers: Vec<Arc<dyn CacheTier>>,
    clock: Arc<dyn Clock>,
}

impl CacheBuilder {
    /// Append a tier behind the ones already added.
    pub fn tier(mut self, tier: impl CacheTier + 'static) -> Self {
        self.tiers.push(Arc::new(tier));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> CacheFacade {
        CacheFacade {
            tiers: self.tiers,
            clock: self.clock,
        }
    }
}

impl CacheFacade {
    pub fn builder() -> CacheBuilder {
        CacheBuilder {
            tiers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Memory and persistent tiers as configured. A shared remote tier can be appended
    /// through [`CacheFacade::builder`].
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut builder = Self::builder();
        if config.memory {
            builder = builder.tier(MemoryTier::new());
        }
        if let Some(dir) = &config.persistent_dir {
            builder = builder.tier(FileTier::new(dir)?);
        }
        Ok(builder.build())
    }

    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        cache_name: &str,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = self.clock.now_millis();
        if let Some(value) = self.lookup(cache_name, key, now) {
            return Ok(value);
        }

        let value = compute().await?;
        if ttl.is_zero() {
            return Ok(value);
        }
        match serde_json::to_string(&value) {
            Ok(serialized) => {
                let entry = StoredEntry {
                    cache_name: cache_name.to_string(),
                    key: key.to_string(),
                    value: serialized,
                    expires_at: expiry(now, ttl),
                };
                for tier in self.available_tiers() {
                    if let Err(e) = tier.put(&entry, now) {
                        tracing::warn!("cache tier {} write failed: {e}", tier.name());
                    }
                }
            }
            Err(e) => tracing::warn!("cache value for {cache_name}/{key} not serializable: {e}"),
        }
        Ok(value)
    }

    fn lookup<T: DeserializeOwned>(&self, cache_name: &str, key: &str, now: u64) -> Option<T> {
        let tiers: Vec<_> = self.available_tiers().collect();
        for (idx, tier) in tiers.iter().enumerate() {
            let entry = match tier.get(cache_name, key) {
                Ok(Some(entry)) if entry.is_live(now) => entry,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("cache tier {} read failed: {e}", tier.name());
                    continue;
                }
            };
            let value = match serde_json::from_str(&entry.value) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        "undecodable cache entry {cache_name}/{key} on {}: {e}",
                        tier.name()
                    );
                    continue;
                }
            };
            for faster in &tiers[..idx] {
                if let Err(e) = faster.put(&entry, now) {
                    tracing::warn!("cache tier {} backfill failed: {e}", faster.name());
                }
            }
            tracing::trace!("cache hit {cache_name}/{key} on {}", tier.name());
            return Some(value);
        }
        None
    }

    /// Remove entries of `cache_name` (every cache when absent) whose key matches
    /// `pattern` (`*` matches any run of characters). Returns how many distinct live
    /// keys were removed.
    pub fn clear(&self, cache_name: Option<&str>, pattern: Option<&str>) -> usize {
        let now = self.clock.now_millis();
        let mut removed: HashSet<EntryId> = HashSet::new();
        for tier in self.available_tiers() {
            match tier.remove(cache_name, pattern, now) {
                Ok(ids) => removed.extend(ids),
                Err(e) => tracing::warn!("cache tier {} clear failed: {e}", tier.name()),
            }
        }
        tracing::info!(
            "cache cleared: name={cache_name:?} pattern={pattern:?} removed={}",
            removed.len()
        );
        removed.len()
    }

    pub fn stats(&self, cache_name: Option<&str>) -> CacheStats {
        let now = self.clock.now_millis();
        let mut distinct: HashSet<EntryId> = HashSet::new();
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let listed = if tier.is_available() {
                tier.live_entries(cache_name, now)
                    .map_err(|e| tracing::warn!("cache tier {} stats failed: {e}", tier.name()))
                    .ok()
            } else {
                None
            };
            let entry_count = listed.as_ref().map(Vec::len);
            if let Some(ids) = listed {
                distinct.extend(ids);
            }
            tiers.push(TierStats {
                name: tier.name(),
                available: entry_count.is_some(),
                entry_count,
            });
        }
        CacheStats {
            cache_name: cache_name.map(str::to_string),
            entry_count: distinct.len(),
            tiers,
        }
    }

    fn available_tiers(&self) -> impl Iterator<Item = &Arc<dyn CacheTier>> {
        self.tiers.iter().filter(|t| t.is_available())
    }
}

/// Absolute expiry in unix milliseconds, saturating for TTLs beyond `u64` millis.
fn expiry(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        sync::atomic::{AtomicBool, Ordering},
    };

    use super::*;
    use crate::testing::{block_on, ManualClock};

    const TTL: Duration = Duration::from_secs(60);

    fn compute_counted<'a>(
        calls: &'a Cell<u32>,
        value: &'a str,
    ) -> impl FnOnce() -> std::future::Ready<Result<String, ()>> + 'a {
        move || {
            calls.set(calls.get() + 1);
            std::future::ready(Ok(value.to_string()))
        }
    }

    #[test]
    fn test_hit_before_ttl_skips_compute() {
        let clock = ManualClock::at(1_000);
        let cache = CacheFacade::builder()
            .tier(MemoryTier::new())
            .clock(clock.clone())
            .build();
        let calls = Cell::new(0);
        block_on(async {
            let first = cache
                .get_or_compute("routing", "k", TTL, compute_counted(&calls, "v1"))
                .await
                .unwrap();
            clock.advance_secs(59);
            let second = cache
                .get_or_compute("routing", "k", TTL, compute_counted(&calls, "v2"))
                .await
                .unwrap();
            assert_eq!(first, second);
            assert_eq!(calls.get(), 1);

            clock.advance_secs(1);
            let third = cache
                .get_or_compute("routing", "k", TTL, compute_counted(&calls, "v3"))
                .await
                .unwrap();
            assert_eq!(third, "v3");
            assert_eq!(calls.get(), 2);
        });
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = CacheFacade::builder().tier(MemoryTier::new()).build();
        block_on(async {
            let failed: Result<String, &str> = cache
                .get_or_compute("routing", "k", TTL, || async { Err("boom") })
                .await;
            assert!(failed.is_err());
            let ok: Result<String, &str> = cache
                .get_or_compute("routing", "k", TTL, || async { Ok("v".to_string()) })
                .await;
            assert_eq!(ok.unwrap(), "v");
        });
        assert_eq!(cache.stats(Some("routing")).entry_count, 1);
    }

    #[test]
    fn test_slow_tier_hit_backfills_memory() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(1_000);
        let memory = MemoryTier::new();
        let persistent = FileTier::new(dir.path()).unwrap();
        persistent
            .put(
                &StoredEntry {
                    cache_name: "routing".into(),
                    key: "k".into(),
                    value: "\"from-disk\"".into(),
                    expires_at: 5_000,
                },
                1_000,
            )
            .unwrap();
        let cache = CacheFacade::builder()
            .tier(memory.clone())
            .tier(persistent)
            .clock(clock)
            .build();

        let calls = Cell::new(0);
        let value = block_on(cache.get_or_compute("routing", "k", TTL, compute_counted(&calls, "x")))
            .unwrap();
        assert_eq!(value, "from-disk");
        assert_eq!(calls.get(), 0);
        let backfilled = memory.get("routing", "k").unwrap().unwrap();
        assert_eq!(backfilled.expires_at, 5_000);
    }

    #[test]
    fn test_clear_pattern_matches_stats_delta() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheFacade::builder()
            .tier(MemoryTier::new())
            .tier(FileTier::new(dir.path()).unwrap())
            .build();
        block_on(async {
            for key in ["ep1/a/k", "ep1/b/k", "ep2/a/k"] {
                let _: Result<String, ()> = cache
                    .get_or_compute("routing", key, TTL, || async { Ok(key.to_string()) })
                    .await;
            }
        });

        let before = cache.stats(Some("routing")).entry_count;
        assert_eq!(before, 3);
        let removed = cache.clear(Some("routing"), Some("ep1/*"));
        assert_eq!(removed, 2);
        let after = cache.stats(Some("routing"));
        assert_eq!(before - after.entry_count, removed);
        assert_eq!(after.tiers.len(), 2);

        assert_eq!(cache.clear(Some("routing"), None), 1);
        assert_eq!(cache.stats(None).entry_count, 0);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        assert_eq!(expiry(1_000, Duration::MAX), u64::MAX);
        assert_eq!(expiry(u64::MAX - 1, TTL), u64::MAX);
        assert_eq!(expiry(1_000, TTL), 61_000);

        let cache = CacheFacade::builder()
            .tier(MemoryTier::new())
            .clock(ManualClock::at(1_000))
            .build();
        let calls = Cell::new(0);
        block_on(async {
            for _ in 0..2 {
                cache
                    .get_or_compute("routing", "k", Duration::MAX, compute_counted(&calls, "v"))
                    .await
                    .unwrap();
            }
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_undecodable_entry_falls_through_to_next_tier() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryTier::new();
        let persistent = FileTier::new(dir.path()).unwrap();
        let stored = |value: &str| StoredEntry {
            cache_name: "routing".into(),
            key: "k".into(),
            value: value.into(),
            expires_at: 5_000,
        };
        memory.put(&stored("{not json"), 1_000).unwrap();
        persistent.put(&stored("\"from-disk\""), 1_000).unwrap();
        let cache = CacheFacade::builder()
            .tier(memory)
            .tier(persistent)
            .clock(ManualClock::at(1_000))
            .build();

        let calls = Cell::new(0);
        let value = block_on(cache.get_or_compute("routing", "k", TTL, compute_counted(&calls, "x")))
            .unwrap();
        assert_eq!(value, "from-disk");
        assert_eq!(calls.get(), 0);
    }

    struct OfflineTier(AtomicBool);

    impl CacheTier for OfflineTier {
        fn name(&self) -> &'static str {
            "remote"
        }

        fn is_available(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn get(&self, _: &str, _: &str) -> Result<Option<StoredEntry>, CacheError> {
            panic!("offline tier read");
        }

        fn put(&self, _: &StoredEntry, _: u64) -> Result<(), CacheError> {
            panic!("offline tier written");
        }

        fn remove(&self, _: Option<&str>, _: Option<&str>, _: u64) -> Result<Vec<EntryId>, CacheError> {
            panic!("offline tier cleared");
        }

        fn live_entries(&self, _: Option<&str>, _: u64) -> Result<Vec<EntryId>, CacheError> {
            panic!("offline tier listed");
        }
    }

    #[test]
    fn test_unreachable_tier_is_skipped() {
        let cache = CacheFacade::builder()
            .tier(MemoryTier::new())
            .tier(OfflineTier(AtomicBool::new(false)))
            .build();
        let value: Result<String, ()> =
            block_on(cache.get_or_compute("routing", "k", TTL, || async { Ok("v".to_string()) }));
        assert_eq!(value.unwrap(), "v");
        assert_eq!(cache.clear(None, None), 1);

        let stats = cache.stats(None).to_json();
        assert_eq!(stats["memory_available"], true);
        assert_eq!(stats["remote_available"], false);
        assert_eq!(stats["entry_count"], 0);
    }
}
