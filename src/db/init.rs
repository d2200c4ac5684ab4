use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn init_db(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(db_path).context("Failed to open database connection")?;

    conn.busy_timeout(Duration::from_secs(5))
        .context("Failed to set busy timeout")?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
        .context("Failed to enable WAL journal")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("Failed to enable foreign keys")?;

    // Absent sub-meeting ids are stored as '' so the natural key stays unique.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meetings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            meeting_id TEXT NOT NULL,
            sub_meeting_id TEXT NOT NULL DEFAULT '',
            subject TEXT,
            meeting_code TEXT,
            meeting_type INTEGER,
            host_id TEXT,
            host_name TEXT,
            scheduled_start INTEGER,
            scheduled_end INTEGER,
            actual_start INTEGER,
            actual_end INTEGER,
            duration_seconds INTEGER,
            has_recording INTEGER NOT NULL DEFAULT 0,
            recording_status TEXT,
            processing_status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (platform, meeting_id, sub_meeting_id)
        )",
        [],
    )
    .context("Failed to create meetings table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recording_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_row_id INTEGER NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
            file_object_id TEXT NOT NULL,
            url TEXT,
            source TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (meeting_row_id, file_object_id)
        )",
        [],
    )
    .context("Failed to create recording_files table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcripts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_row_id INTEGER NOT NULL REFERENCES meetings(id) ON DELETE CASCADE,
            file_object_id TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (meeting_row_id, file_object_id)
        )",
        [],
    )
    .context("Failed to create transcripts table")?;

    // Timestamps in epoch milliseconds.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_key TEXT NOT NULL UNIQUE,
            job_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            next_run_at INTEGER NOT NULL,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER
        )",
        [],
    )
    .context("Failed to create jobs table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, next_run_at)",
        [],
    )
    .context("Failed to create jobs due index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS inflight_tokens (
            token TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create inflight_tokens table")?;

    Ok(())
}
