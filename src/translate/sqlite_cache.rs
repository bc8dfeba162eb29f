//! Persistent translation cache backed by SQLite.
//! Key: (blake3 fingerprint, source lang, target lang), unique.
//! Writes are single-statement upserts; the connection lock is held for one
//! statement only, never across a provider call.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::store::{ttl_secs, CacheError, CacheKey, CacheStore};
use crate::clock::{Clock, SystemClock};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS translation_cache (
        fingerprint BLOB NOT NULL,
        source_lang TEXT NOT NULL,
        target_lang TEXT NOT NULL,
        source_text TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (fingerprint, source_lang, target_lang)
    );
    CREATE INDEX IF NOT EXISTS idx_cache_created
        ON translation_cache(created_at);
    CREATE INDEX IF NOT EXISTS idx_cache_expires
        ON translation_cache(expires_at);";

/// SQLite-backed translation cache.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    /// Open (or create) the cache database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        Self::open_with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn, clock)?;
        info!(path = %db_path.display(), "SQLite translation cache opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn lookup(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_unix();
        let conn = self.conn.lock();
        let result: Option<String> = conn
            .query_row(
                "SELECT translated_text FROM translation_cache
                 WHERE fingerprint = ?1 AND source_lang = ?2 AND target_lang = ?3
                   AND expires_at > ?4",
                params![
                    key.fingerprint.as_bytes().as_slice(),
                    key.source_lang.code(),
                    key.target_lang.code(),
                    now
                ],
                |row| row.get(0),
            )
            .optional()?;

        if result.is_some() {
            debug!(fingerprint = %key.fingerprint.short(), "SQLite cache hit");
        }
        Ok(result)
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
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO translation_cache
             (fingerprint, source_lang, target_lang, source_text, translated_text,
              created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(fingerprint, source_lang, target_lang) DO UPDATE SET
                source_text = excluded.source_text,
                translated_text = excluded.translated_text,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![
                key.fingerprint.as_bytes().as_slice(),
                key.source_lang.code(),
                key.target_lang.code(),
                source_text,
                translated_text,
                now,
                now.saturating_add(ttl),
            ],
        )?;
        Ok(())
    }

    fn purge_expired(&self, older_than: Duration) -> Result<usize, CacheError> {
        let now = self.clock.now_unix();
        let cutoff = now.saturating_sub(older_than.as_secs() as i64);
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM translation_cache WHERE created_at < ?1 OR expires_at <= ?2",
            params![cutoff, now],
        )?;
        if count > 0 {
            info!(removed = count, "SQLite cache purge");
        }
        Ok(count)
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM translation_cache
             WHERE fingerprint = ?1 AND source_lang = ?2 AND target_lang = ?3",
            params![
                key.fingerprint.as_bytes().as_slice(),
                key.source_lang.code(),
                key.target_lang.code()
            ],
        )?;
        Ok(count > 0)
    }

    fn count_entries(&self) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM translation_cache", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_created_since(&self, since: i64) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM translation_cache WHERE created_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
