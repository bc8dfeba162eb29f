//! Translation history (audit log).
//! One record per realized translation that carries a document/field
//! context, cache hits included. Records are independent of cache entries.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::translate::Language;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// A single translation history record.
/// Invariant: `manually_edited` implies `edited_at.is_some()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub article_id: Option<Uuid>,
    pub field_name: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: Language,
    pub target_lang: Language,
    pub manually_edited: bool,
    pub edited_at: Option<i64>,
    pub created_at: i64,
}

impl AuditLogEntry {
    /// Fresh, unedited record.
    pub fn new(
        article_id: Option<Uuid>,
        field_name: impl Into<String>,
        source_text: impl Into<String>,
        translated_text: impl Into<String>,
        source_lang: Language,
        target_lang: Language,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            article_id,
            field_name: field_name.into(),
            source_text: source_text.into(),
            translated_text: translated_text.into(),
            source_lang,
            target_lang,
            manually_edited: false,
            edited_at: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub article_id: Option<Uuid>,
    /// Clamped to `1..=MAX_PAGE_SIZE`; `0` means the default page size.
    pub limit: usize,
    pub offset: usize,
}

impl HistoryQuery {
    fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        }
    }
}

/// Page of history records, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub items: Vec<AuditLogEntry>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("history backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("corrupt history row: {0}")]
    Corrupt(String),
}

pub trait AuditLog: Send + Sync {
    fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditError>;

    fn count(&self) -> Result<u64, AuditError>;

    fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, AuditError>;

    /// Replace the translation with a human edit. Returns false if `id` is unknown.
    fn mark_edited(&self, id: Uuid, translated_text: &str) -> Result<bool, AuditError>;
}

// --- SQLite ---

pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteAuditLog {
    /// Open (or create) the history database.
    pub fn open(db_path: &Path) -> Result<Self, AuditError> {
        Self::open_with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let log = Self::init(conn, clock)?;
        info!(path = %db_path.display(), "translation history opened");
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_logs (
                id TEXT PRIMARY KEY,
                article_id TEXT,
                field_name TEXT NOT NULL,
                source_text TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                source_lang TEXT NOT NULL,
                target_lang TEXT NOT NULL,
                manually_edited INTEGER NOT NULL DEFAULT 0,
                edited_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_article
                ON translation_logs(article_id);
            CREATE INDEX IF NOT EXISTS idx_logs_created
                ON translation_logs(created_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, article_id, field_name, source_text, translated_text,
        source_lang, target_lang, manually_edited, edited_at, created_at
     FROM translation_logs";

fn parse_col<T, E>(idx: usize, raw: &str, parse: impl FnOnce(&str) -> Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parse(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    let id: String = row.get(0)?;
    let article_id: Option<String> = row.get(1)?;
    let source_lang: String = row.get(5)?;
    let target_lang: String = row.get(6)?;
    Ok(AuditLogEntry {
        id: parse_col(0, &id, Uuid::parse_str)?,
        article_id: article_id
            .as_deref()
            .map(|raw| parse_col(1, raw, Uuid::parse_str))
            .transpose()?,
        field_name: row.get(2)?,
        source_text: row.get(3)?,
        translated_text: row.get(4)?,
        source_lang: parse_col(5, &source_lang, str::parse::<Language>)?,
        target_lang: parse_col(6, &target_lang, str::parse::<Language>)?,
        manually_edited: row.get::<_, i32>(7)? != 0,
        edited_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn map_row_error(e: rusqlite::Error) -> AuditError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(idx, _, inner) => {
            AuditError::Corrupt(format!("column {idx}: {inner}"))
        }
        other => AuditError::Backend(other),
    }
}

impl AuditLog for SqliteAuditLog {
    fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO translation_logs
             (id, article_id, field_name, source_text, translated_text,
              source_lang, target_lang, manually_edited, edited_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id.to_string(),
                entry.article_id.map(|id| id.to_string()),
                entry.field_name,
                entry.source_text,
                entry.translated_text,
                entry.source_lang.code(),
                entry.target_lang.code(),
                entry.manually_edited as i32,
                entry.edited_at,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    fn count(&self) -> Result<u64, AuditError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM translation_logs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, AuditError> {
        let limit = query.effective_limit();
        let article = query.article_id.map(|id| id.to_string());
        let conn = self.conn.lock();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM translation_logs WHERE ?1 IS NULL OR article_id = ?1",
            params![article],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE ?1 IS NULL OR article_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let items = stmt
            .query_map(params![article, limit as i64, query.offset as i64], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_row_error)?;

        Ok(HistoryPage {
            items,
            total: total as u64,
            limit,
            offset: query.offset,
        })
    }

    fn mark_edited(&self, id: Uuid, translated_text: &str) -> Result<bool, AuditError> {
        let now = self.clock.now_unix();
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE translation_logs
             SET translated_text = ?2, manually_edited = 1, edited_at = ?3
             WHERE id = ?1",
            params![id.to_string(), translated_text, now],
        )?;
        Ok(updated > 0)
    }
}

impl SqliteAuditLog {
    /// Fetch one record by id.
    pub fn get(&self, id: Uuid) -> Result<Option<AuditLogEntry>, AuditError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id.to_string()],
            row_to_entry,
        )
        .optional()
        .map_err(map_row_error)
    }
}

// --- In-memory ---

/// Vec-backed history, for tests and embedding without a database.
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn count(&self) -> Result<u64, AuditError> {
        Ok(self.entries.lock().len() as u64)
    }

    fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, AuditError> {
        let limit = query.effective_limit();
        let entries = self.entries.lock();
        // Newest first; insertion order breaks created_at ties.
        let mut matching: Vec<&AuditLogEntry> = entries
            .iter()
            .rev()
            .filter(|e| query.article_id.is_none() || e.article_id == query.article_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(HistoryPage {
            items,
            total,
            limit,
            offset: query.offset,
        })
    }

    fn mark_edited(&self, id: Uuid, translated_text: &str) -> Result<bool, AuditError> {
        let now = self.clock.now_unix();
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.translated_text = translated_text.to_string();
                entry.manually_edited = true;
                entry.edited_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
