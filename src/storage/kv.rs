//! Key/value backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{Pool, StorageError};

/// Synchronous string key/value storage.
///
/// Writes replace the whole value stored under a key; there is no partial
/// update and no concurrency token.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process store, optionally bounded by a byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would grow the total stored size (keys plus
    /// values, in bytes) beyond `limit`.
    pub fn with_quota(limit: usize) -> Self {
        Self {
            quota: Some(limit),
            ..Self::default()
        }
    }

    /// Number of successful `set_item` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.lock();

        if let Some(limit) = self.quota {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        items.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// SQLite-backed store. Each row remembers which store instance wrote it
/// last and a database-wide revision, so other instances on the same file
/// can detect changes they did not make (see [`super::watch`]).
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
    instance: String,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            instance: Uuid::new_v4().to_string(),
        }
    }

    /// Identifier stamped on every row this instance writes.
    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    /// Highest revision written so far by anyone.
    pub fn current_revision(&self) -> Result<i64, StorageError> {
        let conn = self.pool.get()?;
        let rev = conn.query_row("SELECT value FROM kv_sequence WHERE id = 1", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(rev)
    }

    /// Keys changed by other instances after `revision`, plus the new
    /// high-water mark to pass on the next call.
    pub fn foreign_changes_since(&self, revision: i64) -> Result<(Vec<String>, i64), StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT key, writer, revision FROM kv_items
             WHERE revision > ?1
             ORDER BY revision ASC",
        )?;

        let rows = stmt.query_map(params![revision], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut keys = Vec::new();
        let mut high_water = revision;
        for r in rows {
            let (key, writer, rev) = r?;
            high_water = high_water.max(rev);
            if writer != self.instance && !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok((keys, high_water))
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute("UPDATE kv_sequence SET value = value + 1 WHERE id = 1", [])?;
        let revision: i64 =
            tx.query_row("SELECT value FROM kv_sequence WHERE id = 1", [], |row| row.get(0))?;

        tx.execute(
            "INSERT INTO kv_items (key, value, writer, revision, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                writer = excluded.writer,
                revision = excluded.revision,
                updated_at = excluded.updated_at",
            params![
                key,
                value,
                self.instance,
                revision,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_items WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(key, Some(value))
    }

    /// Removal leaves a tombstone row so the change carries a revision.
    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.write(key, None)
    }
}
