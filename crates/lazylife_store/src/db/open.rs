//! Connection bootstrap for the key-value store.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.
//! - File stores run in WAL mode so readers in sibling contexts never block
//!   the writer; lock waits are bounded by `BUSY_TIMEOUT`.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum StoreKind {
    File,
    Memory,
}

impl StoreKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens the store file shared by every context of one profile.
///
/// # Side effects
/// - Emits one `db_open` event with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    timed_open(StoreKind::File, || {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        apply_migrations(&mut conn)?;
        Ok(conn)
    })
}

/// Opens a private in-memory store.
///
/// Each call is isolated; cross-context sharing needs a file.
pub fn open_db_in_memory() -> DbResult<Connection> {
    timed_open(StoreKind::Memory, || {
        let mut conn = Connection::open_in_memory()?;
        apply_migrations(&mut conn)?;
        Ok(conn)
    })
}

fn timed_open(
    kind: StoreKind,
    open: impl FnOnce() -> DbResult<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let result = open();
    let duration_ms = started_at.elapsed().as_millis();

    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={duration_ms}",
            kind.as_str()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={duration_ms} error_code={} error={err}",
            kind.as_str(),
            error_code(err)
        ),
    }
    result
}

fn error_code(err: &DbError) -> &'static str {
    match err {
        DbError::Sqlite(_) => "db_open_failed",
        DbError::UnsupportedSchemaVersion { .. } => "schema_too_new",
        DbError::Migration { .. } => "migration_failed",
    }
}
