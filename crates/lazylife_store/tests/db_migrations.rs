use lazylife_store::db::migrations::{latest_version, schema_status};
use lazylife_store::db::{open_db, open_db_in_memory, DbError};
use lazylife_store::{MediumError, SqliteMedium, StorageMedium};
use rusqlite::Connection;

fn kv_columns(conn: &Connection) -> Vec<String> {
    let mut stmt = conn.prepare("PRAGMA table_info(kv_items);").unwrap();
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    columns
}

#[test]
fn in_memory_store_has_kv_schema() {
    let conn = open_db_in_memory().unwrap();

    assert!(schema_status(&conn).unwrap().is_current());
    assert_eq!(kv_columns(&conn), vec!["key", "value", "updated_at"]);
}

#[test]
fn reopening_a_store_file_keeps_data_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lazylife.db");

    SqliteMedium::open(&path)
        .unwrap()
        .set_item("guest_streak", "2")
        .unwrap();

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_status(&conn).unwrap().current, latest_version());
    let journal: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal.to_ascii_lowercase(), "wal");

    let value: String = conn
        .query_row(
            "SELECT value FROM kv_items WHERE key = 'guest_streak';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(value, "2");
}

#[test]
fn store_written_by_newer_build_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("PRAGMA user_version = 42;")
        .unwrap();

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 42);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = SqliteMedium::open(&path).err().unwrap();
    assert!(matches!(
        err,
        MediumError::Db(DbError::UnsupportedSchemaVersion { .. })
    ));
    assert!(err.to_string().contains("42"));
}
