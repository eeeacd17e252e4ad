//! Core ResponseStore implementation

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::CacheError;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS responses (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    inserted_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_responses_inserted_at ON responses(inserted_at);
"#;

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A stored response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical request digest
    pub key: String,
    /// Serialized response
    pub value: String,
    /// Insertion timestamp (unix ms)
    pub inserted_at: i64,
}

/// Entry metadata without the value, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: String,
    pub bytes: u64,
    pub inserted_at: i64,
}

/// Aggregate statistics for the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_bytes: u64,
    pub oldest_inserted_at: Option<i64>,
    pub newest_inserted_at: Option<i64>,
}

/// SQLite-backed key/value store of responses
///
/// Entries never expire; `set` on an existing key replaces its value.
///
/// A file-backed store keeps a second connection for reads, so under WAL a
/// lookup never queues behind a write. SQLite admits one writer at a time,
/// so writes share a single connection.
pub struct ResponseStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl ResponseStore {
    /// Open (or create) the store at the given database path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "ResponseStore::open: called");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(&path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open(&path)?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        info!(path = %path.display(), "Opened response store");
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, CacheError> {
        debug!("ResponseStore::open_in_memory: called");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            writer: Mutex::new(conn),
            reader: None,
        })
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read connection; an in-memory store has only the one
    fn reader(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            None => self.writer(),
        }
    }

    /// Look up the value stored for a key
    pub fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        debug!(%key, "ResponseStore::get: called");
        let value = self
            .reader()
            .query_row("SELECT value FROM responses WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        debug!(%key, hit = value.is_some(), "ResponseStore::get: done");
        Ok(value)
    }

    /// Look up the full entry for a key
    pub fn entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        debug!(%key, "ResponseStore::entry: called");
        let entry = self
            .reader()
            .query_row(
                "SELECT key, value, inserted_at FROM responses WHERE key = ?1",
                params![key],
                |row| {
                    Ok(CacheEntry {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        inserted_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Store a value, replacing any previous value for the key
    pub fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        debug!(%key, bytes = value.len(), "ResponseStore::set: called");
        self.writer().execute(
            "INSERT INTO responses (key, value, inserted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, inserted_at = excluded.inserted_at",
            params![key, value, crate::now_ms()],
        )?;
        Ok(())
    }

    /// Delete one entry, returning whether it existed
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        debug!(%key, "ResponseStore::remove: called");
        let removed = self.writer().execute("DELETE FROM responses WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// Delete every entry, returning how many were removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        debug!("ResponseStore::clear: called");
        let removed = self.writer().execute("DELETE FROM responses", [])?;
        info!(removed, "Cleared response store");
        Ok(removed)
    }

    /// List entries, newest first
    pub fn list(&self, limit: usize) -> Result<Vec<EntrySummary>, CacheError> {
        debug!(limit, "ResponseStore::list: called");
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT key, LENGTH(value), inserted_at FROM responses
             ORDER BY inserted_at DESC, key ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(EntrySummary {
                key: row.get(0)?,
                bytes: row.get::<_, i64>(1)? as u64,
                inserted_at: row.get(2)?,
            })
        })?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Aggregate statistics
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        debug!("ResponseStore::stats: called");
        let stats = self.reader().query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0), MIN(inserted_at), MAX(inserted_at) FROM responses",
            [],
            |row| {
                Ok(CacheStats {
                    entry_count: row.get::<_, i64>(0)? as u64,
                    total_bytes: row.get::<_, i64>(1)? as u64,
                    oldest_inserted_at: row.get(2)?,
                    newest_inserted_at: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}
