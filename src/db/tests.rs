use super::init::{init_db, migrate};
use rusqlite::Connection;

fn table_exists(conn: &Connection, name: &str) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get(0),
        )
        .unwrap();
    count == 1
}

#[test]
fn test_migrate_creates_tables() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();

    for table in ["meetings", "recording_files", "transcripts", "jobs", "inflight_tokens"] {
        assert!(table_exists(&conn, table), "missing table {table}");
    }
}

#[test]
fn test_migrate_is_idempotent() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    migrate(&conn).unwrap();
    assert!(table_exists(&conn, "jobs"));
}

#[test]
fn test_natural_key_is_unique() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();

    conn.execute(
        "INSERT INTO meetings (platform, meeting_id) VALUES ('tencent', 'm-1')",
        [],
    )
    .unwrap();
    let duplicate = conn.execute(
        "INSERT INTO meetings (platform, meeting_id) VALUES ('tencent', 'm-1')",
        [],
    );
    assert!(duplicate.is_err());

    // Same id on another platform is a different meeting.
    conn.execute(
        "INSERT INTO meetings (platform, meeting_id) VALUES ('lark', 'm-1')",
        [],
    )
    .unwrap();
}

#[test]
fn test_idempotency_key_is_unique() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();

    let insert = "INSERT INTO jobs (idempotency_key, job_type, payload, max_attempts, \
                  next_run_at, created_at, updated_at) VALUES ('k', 'webhook.event', '{}', 3, 0, 0, 0)";
    conn.execute(insert, []).unwrap();
    assert!(conn.execute(insert, []).is_err());
}

#[test]
fn test_init_db_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("minutehook.db");

    let conn = init_db(&path).unwrap();
    assert!(path.exists());
    assert!(table_exists(&conn, "meetings"));
}
