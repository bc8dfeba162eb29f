//! Cache store seam: one entry per (fingerprint, source lang, target lang),
//! each bounded by a TTL. Backends: [`super::sqlite_cache::SqliteCacheStore`]
//! (persistent) and [`super::cache::MemoryCacheStore`] (in-process LRU).

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::fingerprint::Fingerprint;
use super::Language;

/// Unique identity of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub source_lang: Language,
    pub target_lang: Language,
}

impl CacheKey {
    pub fn new(fingerprint: Fingerprint, source_lang: Language, target_lang: Language) -> Self {
        Self {
            fingerprint,
            source_lang,
            target_lang,
        }
    }
}

/// A stored translation. Invariant: `expires_at > created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub source_lang: Language,
    pub target_lang: Language,
    pub source_text: String,
    pub translated_text: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("cache TTL must be at least one second")]
    InvalidTtl,
    #[error("corrupt cache row: {0}")]
    Corrupt(String),
}

/// TTL-bounded translation cache.
///
/// Implementations must make each call atomic with respect to the others:
/// a concurrent `lookup` never observes a half-written or half-deleted entry.
pub trait CacheStore: Send + Sync {
    /// Returns the cached translation, or `None` when absent or when
    /// `expires_at <= now`.
    fn lookup(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;

    /// Upserts an entry with `expires_at = now + ttl`.
    fn store(
        &self,
        key: &CacheKey,
        source_text: &str,
        translated_text: &str,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Deletes entries created before `now - older_than`, plus any entry already
    /// past its expiry. Returns the number of deleted entries.
    fn purge_expired(&self, older_than: Duration) -> Result<usize, CacheError>;

    /// Removes one entry. Returns whether anything was deleted.
    fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError>;

    fn count_entries(&self) -> Result<u64, CacheError>;

    /// Entries with `created_at >= since` (Unix seconds).
    fn count_created_since(&self, since: i64) -> Result<u64, CacheError>;
}

/// Converts a TTL to whole seconds, rejecting anything that would violate
/// `expires_at > created_at`.
pub(crate) fn ttl_secs(ttl: Duration) -> Result<i64, CacheError> {
    let secs = ttl.as_secs();
    if secs == 0 {
        return Err(CacheError::InvalidTtl);
    }
    Ok(i64::try_from(secs).unwrap_or(i64::MAX))
}
