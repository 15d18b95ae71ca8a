//! Cache storage.
//!
//! [`CacheStore`] is the seam to whatever key-value store backs the query
//! cache. [`MemoryCacheStore`] is the in-process implementation: an LRU bounded
//! by entry count whose entries also carry an absolute expiry.

use std::sync::{Arc, RwLock};

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::CacheError;
use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_STORE_TOTAL: &str = "presskit_cache_store_total";
pub(crate) const METRIC_CACHE_EVICT_TOTAL: &str = "presskit_cache_evict_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// A key-value store with per-entry expiry. Expired entries must read as absent.
pub trait CacheStore: Send + Sync {
    fn has(&self, key: &str) -> Result<bool, CacheError>;
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn put(&self, key: &str, value: String, expires_at: OffsetDateTime) -> Result<(), CacheError>;
    fn forget(&self, key: &str) -> Result<(), CacheError>;
}

pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    /// Live entry for `key`; an expired one is dropped on the way.
    fn live(&self, key: &str, op: &'static str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, op);
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            counter!(METRIC_CACHE_EVICT_TOTAL, "reason" => "expired").increment(1);
            debug!(target_module = SOURCE, op, cache_key = key, "dropped expired entry");
        }
        None
    }
}

impl CacheStore for MemoryCacheStore {
    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key, "has").is_some())
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live(key, "get").map(|entry| entry.value))
    }

    fn put(&self, key: &str, value: String, expires_at: OffsetDateTime) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            expires_at,
        };
        let evicted = rw_write(&self.entries, SOURCE, "put").push(key.to_string(), entry);
        counter!(METRIC_CACHE_STORE_TOTAL).increment(1);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_CACHE_EVICT_TOTAL, "reason" => "capacity").increment(1);
        }
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<(), CacheError> {
        rw_write(&self.entries, SOURCE, "forget").pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::Duration;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn store_with_clock(capacity: usize) -> (MemoryCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = CacheConfig {
            capacity,
            ..Default::default()
        };
        let store = MemoryCacheStore::with_clock(&config, clock.clone());
        (store, clock)
    }

    #[test]
    fn entries_expire_at_their_deadline() {
        let (store, clock) = store_with_clock(8);
        let expires_at = clock.now() + Duration::from_secs(300);
        store
            .put("wp-get-post-1", "{}".into(), expires_at)
            .expect("put");

        clock.advance(Duration::from_secs(299));
        assert_eq!(store.get("wp-get-post-1").expect("get").as_deref(), Some("{}"));

        clock.advance(Duration::from_secs(1));
        assert!(!store.has("wp-get-post-1").expect("has"));
        assert!(store.is_empty());
    }

    #[test]
    fn forget_removes_entry() {
        let (store, clock) = store_with_clock(8);
        store
            .put("key", "1".into(), clock.now() + Duration::from_secs(60))
            .expect("put");
        store.forget("key").expect("forget");
        assert_eq!(store.get("key").expect("get"), None);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let (store, clock) = store_with_clock(2);
        let later = clock.now() + Duration::from_secs(60);
        store.put("a", "1".into(), later).expect("put");
        store.put("b", "2".into(), later).expect("put");
        assert!(store.has("a").expect("has"));
        store.put("c", "3".into(), later).expect("put");

        assert!(store.has("a").expect("has"));
        assert!(!store.has("b").expect("has"));
        assert!(store.has("c").expect("has"));
    }

    #[test]
    fn overwriting_replaces_value_and_deadline() {
        let (store, clock) = store_with_clock(2);
        store
            .put("a", "old".into(), clock.now() + Duration::from_secs(1))
            .expect("put");
        store
            .put("a", "new".into(), clock.now() + Duration::from_secs(60))
            .expect("put");
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.get("a").expect("get").as_deref(), Some("new"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let (store, clock) = store_with_clock(2);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store
            .put("a", "1".into(), clock.now() + Duration::from_secs(60))
            .expect("put");
        assert!(store.has("a").expect("has"));
    }
}
