//! In-memory LRU translation cache with TTL.
//! Capacity-bounded: the least recently used entry is evicted when full.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::store::{ttl_secs, CacheEntry, CacheError, CacheKey, CacheStore};
use crate::clock::{Clock, SystemClock};

pub struct MemoryCacheStore {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn lookup(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_unix();
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.translated_text.clone()));
            }
            // Expired, drop it now rather than waiting for the sweep
            cache.pop(key);
        }
        Ok(None)
    }

    fn store(
        &self,
        key: &CacheKey,
        source_text: &str,
        translated_text: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let ttl = ttl_secs(ttl)?;
        let now = self.clock.now_unix();
        let entry = CacheEntry {
            fingerprint: key.fingerprint.to_hex(),
            source_lang: key.source_lang,
            target_lang: key.target_lang,
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
            created_at: now,
            expires_at: now.saturating_add(ttl),
        };
        if let Some((evicted, _)) = self.inner.lock().push(*key, entry) {
            if evicted != *key {
                debug!(fingerprint = %evicted.fingerprint.short(), "memory cache evicted LRU entry");
            }
        }
        Ok(())
    }

    fn purge_expired(&self, older_than: Duration) -> Result<usize, CacheError> {
        let now = self.clock.now_unix();
        let cutoff = now.saturating_sub(older_than.as_secs() as i64);
        let mut cache = self.inner.lock();
        let doomed: Vec<CacheKey> = cache
            .iter()
            .filter(|(_, e)| e.created_at < cutoff || e.expires_at <= now)
            .map(|(k, _)| *k)
            .collect();
        for key in &doomed {
            cache.pop(key);
        }
        Ok(doomed.len())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.inner.lock().pop(key).is_some())
    }

    fn count_entries(&self) -> Result<u64, CacheError> {
        Ok(self.inner.lock().len() as u64)
    }

    fn count_created_since(&self, since: i64) -> Result<u64, CacheError> {
        let cache = self.inner.lock();
        Ok(cache.iter().filter(|(_, e)| e.created_at >= since).count() as u64)
    }
}
