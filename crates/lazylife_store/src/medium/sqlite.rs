//! SQLite-backed medium shared by every process that opens the same file.
//!
//! # Responsibility
//! - Persist namespaced items in the `kv_items` table.
//! - Detect commits from sibling connections via `PRAGMA data_version`.
//!
//! # Invariants
//! - One `SqliteMedium` is one context; its own commits never flip the
//!   external change marker.
//! - This medium cannot push; contexts must poll it.

use super::{entry_bytes, MediumError, MediumResult, StorageMedium};
use crate::db::{open_db, open_db_in_memory};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct SqliteMedium {
    conn: Mutex<Connection>,
    quota_bytes: Option<u64>,
    last_data_version: Mutex<i64>,
}

impl SqliteMedium {
    /// Opens (or creates) a shared store file and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> MediumResult<Self> {
        Self::from_connection(open_db(path)?)
    }

    /// Opens a private store; useful for single-context tools and tests.
    pub fn open_in_memory() -> MediumResult<Self> {
        Self::from_connection(open_db_in_memory()?)
    }

    /// Caps the total stored bytes (keys plus values).
    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn from_connection(conn: Connection) -> MediumResult<Self> {
        let data_version = read_data_version(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes: None,
            last_data_version: Mutex::new(data_version),
        })
    }

    fn conn(&self) -> MediumResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MediumError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    fn check_quota(&self, conn: &Connection, key: &str, value: &str) -> MediumResult<()> {
        let Some(quota_bytes) = self.quota_bytes else {
            return Ok(());
        };
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv_items
             WHERE key <> ?1;",
            [key],
            |row| row.get(0),
        )?;
        let required_bytes = used.max(0) as u64 + entry_bytes(key, value);
        if required_bytes > quota_bytes {
            return Err(MediumError::QuotaExceeded {
                key: key.to_string(),
                required_bytes,
                quota_bytes,
            });
        }
        Ok(())
    }
}

impl StorageMedium for SqliteMedium {
    fn get_item(&self, key: &str) -> MediumResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_items WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> MediumResult<()> {
        let conn = self.conn()?;
        self.check_quota(&conn, key, value)?;
        conn.execute(
            "INSERT INTO kv_items (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now') * 1000)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> MediumResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_items WHERE key = ?1;", [key])?;
        Ok(())
    }

    fn keys(&self) -> MediumResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM kv_items ORDER BY key ASC;")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn poll_external_change(&self) -> MediumResult<bool> {
        let current = read_data_version(&*self.conn()?)?;
        let mut last = self
            .last_data_version
            .lock()
            .map_err(|_| MediumError::Unavailable("data_version lock poisoned".to_string()))?;
        if *last == current {
            return Ok(false);
        }
        debug!(
            "event=external_change module=medium status=ok medium=sqlite data_version={current}"
        );
        *last = current;
        Ok(true)
    }
}

fn read_data_version(conn: &Connection) -> MediumResult<i64> {
    Ok(conn.query_row("PRAGMA data_version;", [], |row| row.get(0))?)
}
