//! Cache-aside query caching.
//!
//! The factories route every read through [`QueryCache::remember`]: look the
//! key up, and on a miss run the query, post-process it, and store the
//! JSON-encoded result with a TTL. Entries are never served past their
//! expiry. With [`InvalidationPolicy::OnWrite`] the cache also remembers the
//! keys it stored so writers can drop them.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! capacity = 1024
//! post_ttl_secs = 300
//! menu_ttl_secs = 900
//! invalidation = "ttl_only"
//! ```

mod clock;
mod config;
pub mod keys;
pub(crate) mod lock;
mod store;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, InvalidationPolicy};
pub use keys::signature;
pub use store::{CacheEntry, CacheStore, MemoryCacheStore};
pub(crate) use store::{METRIC_CACHE_EVICT_TOTAL, METRIC_CACHE_STORE_TOTAL};

use lock::mutex_lock;

const SOURCE: &str = "cache";

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "presskit_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "presskit_cache_miss_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache value codec failed: {0}")]
    Codec(#[source] serde_json::Error),
    #[error("cache store failed: {message}")]
    Store { message: String },
}

impl CacheError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    enabled: AtomicBool,
    written: Mutex<BTreeSet<String>>,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// The clock must be the one the store checks expiry against.
    pub fn with_clock(store: Arc<dyn CacheStore>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let enabled = AtomicBool::new(config.enabled);
        Self {
            store,
            clock,
            config,
            enabled,
            written: Mutex::new(BTreeSet::new()),
        }
    }

    /// An in-process LRU store sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let store = Arc::new(MemoryCacheStore::new(&config));
        Self::new(store, config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self) -> InvalidationPolicy {
        self.config.invalidation
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// A failing `compute` stores nothing. A stored value that no longer
    /// decodes as `T` is dropped and recomputed.
    pub async fn remember<T, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled() {
            return compute().await;
        }

        if let Some(raw) = self.store.get(key)? {
            match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                    debug!(target_module = SOURCE, op = "remember", cache_key = key, result = "hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        target_module = SOURCE,
                        op = "remember",
                        cache_key = key,
                        error = %err,
                        "cached value did not decode; recomputing"
                    );
                    self.store.forget(key)?;
                }
            }
        }

        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        debug!(target_module = SOURCE, op = "remember", cache_key = key, result = "miss");

        let value = compute().await?;
        let encoded = serde_json::to_string(&value).map_err(CacheError::Codec)?;
        let expires_at = self.clock.now() + ttl;
        self.store.put(key, encoded, expires_at)?;
        if self.policy() == InvalidationPolicy::OnWrite {
            mutex_lock(&self.written, SOURCE, "remember.track").insert(key.to_string());
        }
        Ok(value)
    }

    pub fn forget(&self, key: &str) -> Result<(), CacheError> {
        mutex_lock(&self.written, SOURCE, "forget.untrack").remove(key);
        self.store.forget(key)
    }

    /// Drop every key stored since the last invalidation. Only keys stored
    /// under [`InvalidationPolicy::OnWrite`] are tracked.
    pub fn invalidate_written(&self) -> Result<usize, CacheError> {
        let keys = std::mem::take(&mut *mutex_lock(&self.written, SOURCE, "invalidate_written"));
        for key in &keys {
            self.store.forget(key)?;
        }
        if !keys.is_empty() {
            debug!(
                target_module = SOURCE,
                op = "invalidate_written",
                forgotten = keys.len(),
                "forgot cached query results after write"
            );
        }
        Ok(keys.len())
    }
}
