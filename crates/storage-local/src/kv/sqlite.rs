use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use finsync_core::storage::{Callback, Listeners, Subscription};

use super::{ContextId, KvStore, StorageEvent};
use crate::errors::{Result, StorageError};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Durable store backed by a single SQLite table.
///
/// Watch notifications are delivered to watchers registered on the same
/// `SqliteKvStore` handle; share the handle between contexts to observe
/// each other's writes.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    listeners: Listeners<StorageEvent>,
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute(CREATE_TABLE_SQL, [])?;
        debug!("[LocalStorage] Opened key/value store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            listeners: Listeners::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }

    fn read(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

impl KvStore for SqliteKvStore {
    fn probe(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Self::read(&conn, key)
    }

    fn set(&self, origin: ContextId, key: &str, value: &str) -> Result<()> {
        let old_value = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let old_value = Self::read(&tx, key)?;
            tx.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            old_value
        };

        self.listeners.emit(&StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: Some(value.to_string()),
            origin,
        });
        Ok(())
    }

    fn remove(&self, origin: ContextId, key: &str) -> Result<()> {
        let old_value = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let old_value = Self::read(&tx, key)?;
            tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            tx.commit()?;
            old_value
        };

        if old_value.is_some() {
            self.listeners.emit(&StorageEvent {
                key: key.to_string(),
                old_value,
                new_value: None,
                origin,
            });
        }
        Ok(())
    }

    fn watch(&self, callback: Callback<StorageEvent>) -> Subscription {
        self.listeners.subscribe(callback)
    }
}
