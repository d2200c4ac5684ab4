//! Meeting, recording file and transcript persistence.
//!
//! Every write is keyed by the meeting's natural key, so duplicate deliveries
//! converge on the same row. Raw SQL with rusqlite, no ORM.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{with_connection, BlockingError, SharedConnection};
use crate::events::Provider;
use crate::queue::JobError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Busy, locked or constraint failure. Retried once, then escalated.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("meeting not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    #[error(transparent)]
    Blocking(#[from] BlockingError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::ConstraintViolation
                ) =>
            {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => JobError::Fatal(err.to_string()),
            _ => JobError::Retryable(err.to_string()),
        }
    }
}

/// Downstream processing state of a meeting. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ProcessingStatus> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn can_advance(&self, to: ProcessingStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Completed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeetingKey {
    pub platform: Provider,
    pub meeting_id: String,
    pub sub_meeting_id: Option<String>,
}

impl MeetingKey {
    pub fn new(platform: Provider, meeting_id: impl Into<String>, sub_meeting_id: Option<String>) -> Self {
        Self {
            platform,
            meeting_id: meeting_id.into(),
            sub_meeting_id: sub_meeting_id.filter(|s| !s.is_empty()),
        }
    }

    fn sub_column(&self) -> &str {
        self.sub_meeting_id.as_deref().unwrap_or("")
    }
}

impl std::fmt::Display for MeetingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.meeting_id)?;
        if let Some(sub) = &self.sub_meeting_id {
            write!(f, ":{}", sub)?;
        }
        Ok(())
    }
}

/// Fields to merge into a meeting. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingFields {
    pub subject: Option<String>,
    pub meeting_code: Option<String>,
    pub meeting_type: Option<i64>,
    pub host_id: Option<String>,
    pub host_name: Option<String>,
    pub scheduled_start: Option<i64>,
    pub scheduled_end: Option<i64>,
    pub actual_start: Option<i64>,
    pub actual_end: Option<i64>,
    pub duration_seconds: Option<i64>,
    /// Only `Some(true)` has an effect.
    pub has_recording: Option<bool>,
    pub recording_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingRecord {
    pub id: i64,
    pub platform: String,
    pub meeting_id: String,
    pub sub_meeting_id: Option<String>,
    pub subject: Option<String>,
    pub meeting_code: Option<String>,
    pub meeting_type: Option<i64>,
    pub host_id: Option<String>,
    pub host_name: Option<String>,
    pub scheduled_start: Option<i64>,
    pub scheduled_end: Option<i64>,
    pub actual_start: Option<i64>,
    pub actual_end: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub has_recording: bool,
    pub recording_status: Option<String>,
    pub processing_status: ProcessingStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFile {
    /// Record file id (Tencent) or minute token (Lark).
    pub file_object_id: String,
    pub url: Option<String>,
    pub source: Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub file_object_id: String,
    pub text: String,
}

const MEETING_COLUMNS: &str = "id, platform, meeting_id, sub_meeting_id, subject, meeting_code, \
     meeting_type, host_id, host_name, scheduled_start, scheduled_end, actual_start, actual_end, \
     duration_seconds, has_recording, recording_status, processing_status, created_at, updated_at";

fn meeting_from_row(row: &Row<'_>) -> rusqlite::Result<MeetingRecord> {
    let sub: String = row.get(3)?;
    let status: String = row.get(16)?;
    Ok(MeetingRecord {
        id: row.get(0)?,
        platform: row.get(1)?,
        meeting_id: row.get(2)?,
        sub_meeting_id: if sub.is_empty() { None } else { Some(sub) },
        subject: row.get(4)?,
        meeting_code: row.get(5)?,
        meeting_type: row.get(6)?,
        host_id: row.get(7)?,
        host_name: row.get(8)?,
        scheduled_start: row.get(9)?,
        scheduled_end: row.get(10)?,
        actual_start: row.get(11)?,
        actual_end: row.get(12)?,
        duration_seconds: row.get(13)?,
        has_recording: row.get(14)?,
        recording_status: row.get(15)?,
        processing_status: ProcessingStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                16,
                rusqlite::types::Type::Text,
                format!("unknown processing status '{}'", status).into(),
            )
        })?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

/// Repository for meeting records.
pub struct MeetingRepository;

impl MeetingRepository {
    pub fn find(conn: &Connection, key: &MeetingKey) -> Result<Option<MeetingRecord>, StoreError> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM meetings WHERE platform = ?1 AND meeting_id = ?2 AND sub_meeting_id = ?3",
                    MEETING_COLUMNS
                ),
                params![key.platform.as_str(), key.meeting_id, key.sub_column()],
                meeting_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn require(conn: &Connection, key: &MeetingKey) -> Result<MeetingRecord, StoreError> {
        Self::find(conn, key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Insert on first sight, otherwise merge. Absent fields never clobber
    /// stored ones and `has_recording` never goes back to false.
    pub fn upsert(
        conn: &Connection,
        key: &MeetingKey,
        fields: &MeetingFields,
    ) -> Result<MeetingRecord, StoreError> {
        conn.execute(
            "INSERT INTO meetings (platform, meeting_id, sub_meeting_id, subject, meeting_code, \
             meeting_type, host_id, host_name, scheduled_start, scheduled_end, actual_start, \
             actual_end, duration_seconds, has_recording, recording_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
             ON CONFLICT (platform, meeting_id, sub_meeting_id) DO UPDATE SET \
                subject = COALESCE(excluded.subject, meetings.subject), \
                meeting_code = COALESCE(excluded.meeting_code, meetings.meeting_code), \
                meeting_type = COALESCE(excluded.meeting_type, meetings.meeting_type), \
                host_id = COALESCE(excluded.host_id, meetings.host_id), \
                host_name = COALESCE(excluded.host_name, meetings.host_name), \
                scheduled_start = COALESCE(excluded.scheduled_start, meetings.scheduled_start), \
                scheduled_end = COALESCE(excluded.scheduled_end, meetings.scheduled_end), \
                actual_start = COALESCE(excluded.actual_start, meetings.actual_start), \
                actual_end = COALESCE(excluded.actual_end, meetings.actual_end), \
                duration_seconds = COALESCE(excluded.duration_seconds, meetings.duration_seconds), \
                has_recording = MAX(excluded.has_recording, meetings.has_recording), \
                recording_status = COALESCE(excluded.recording_status, meetings.recording_status), \
                updated_at = CURRENT_TIMESTAMP",
            params![
                key.platform.as_str(),
                key.meeting_id,
                key.sub_column(),
                fields.subject,
                fields.meeting_code,
                fields.meeting_type,
                fields.host_id,
                fields.host_name,
                fields.scheduled_start,
                fields.scheduled_end,
                fields.actual_start,
                fields.actual_end,
                fields.duration_seconds,
                fields.has_recording.unwrap_or(false),
                fields.recording_status,
            ],
        )?;

        Self::require(conn, key)
    }

    pub fn append_recording_file(
        conn: &Connection,
        key: &MeetingKey,
        file: &RecordingFile,
    ) -> Result<(), StoreError> {
        let meeting = Self::require(conn, key)?;
        conn.execute(
            "INSERT INTO recording_files (meeting_row_id, file_object_id, url, source) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (meeting_row_id, file_object_id) DO UPDATE SET \
                url = COALESCE(excluded.url, recording_files.url)",
            params![meeting.id, file.file_object_id, file.url, file.source.as_str()],
        )?;
        Ok(())
    }

    pub fn list_recording_files(
        conn: &Connection,
        key: &MeetingKey,
    ) -> Result<Vec<RecordingFile>, StoreError> {
        let meeting = Self::require(conn, key)?;
        let mut stmt = conn.prepare(
            "SELECT file_object_id, url, source FROM recording_files \
             WHERE meeting_row_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![meeting.id], |row| {
            Ok((row.get::<_, String>(0)?, row.get(1)?, row.get::<_, String>(2)?))
        })?;

        let mut files = Vec::new();
        for row in rows {
            let (file_object_id, url, source) = row?;
            files.push(RecordingFile {
                file_object_id,
                url,
                source: Provider::parse(&source).unwrap_or(key.platform),
            });
        }
        Ok(files)
    }

    pub fn upsert_transcript(
        conn: &Connection,
        key: &MeetingKey,
        transcript: &Transcript,
    ) -> Result<(), StoreError> {
        let meeting = Self::require(conn, key)?;
        conn.execute(
            "INSERT INTO transcripts (meeting_row_id, file_object_id, text) VALUES (?1, ?2, ?3) \
             ON CONFLICT (meeting_row_id, file_object_id) DO UPDATE SET \
                text = excluded.text, updated_at = CURRENT_TIMESTAMP",
            params![meeting.id, transcript.file_object_id, transcript.text],
        )?;
        Ok(())
    }

    pub fn get_transcript(
        conn: &Connection,
        key: &MeetingKey,
        file_object_id: &str,
    ) -> Result<Option<Transcript>, StoreError> {
        let Some(meeting) = Self::find(conn, key)? else {
            return Ok(None);
        };
        let text: Option<String> = conn
            .query_row(
                "SELECT text FROM transcripts WHERE meeting_row_id = ?1 AND file_object_id = ?2",
                params![meeting.id, file_object_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text.map(|text| Transcript {
            file_object_id: file_object_id.to_string(),
            text,
        }))
    }

    /// Apply a legal status transition. Illegal or backward moves leave the
    /// record unchanged.
    pub fn advance_status(
        conn: &Connection,
        key: &MeetingKey,
        to: ProcessingStatus,
    ) -> Result<MeetingRecord, StoreError> {
        let current = Self::require(conn, key)?;
        let from = current.processing_status;

        if !from.can_advance(to) {
            if from != to {
                debug!(meeting = %key, from = from.as_str(), to = to.as_str(), "Ignoring status transition");
            }
            return Ok(current);
        }

        // Compare-and-set on the status we read.
        let changed = conn.execute(
            "UPDATE meetings SET processing_status = ?1, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?2 AND processing_status = ?3",
            params![to.as_str(), current.id, from.as_str()],
        )?;
        if changed == 0 {
            debug!(meeting = %key, "Status changed concurrently, keeping stored value");
        }

        Self::require(conn, key)
    }
}

/// Narrow, idempotent write interface used by the pipeline.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn find_by_natural_key(&self, key: &MeetingKey) -> Result<Option<MeetingRecord>, StoreError>;

    async fn upsert_meeting(
        &self,
        key: &MeetingKey,
        fields: &MeetingFields,
    ) -> Result<MeetingRecord, StoreError>;

    async fn append_recording_file(&self, key: &MeetingKey, file: &RecordingFile) -> Result<(), StoreError>;

    async fn upsert_transcript(&self, key: &MeetingKey, transcript: &Transcript) -> Result<(), StoreError>;

    async fn advance_status(
        &self,
        key: &MeetingKey,
        to: ProcessingStatus,
    ) -> Result<MeetingRecord, StoreError>;
}

#[derive(Clone)]
pub struct SqliteMeetingStore {
    conn: SharedConnection,
}

impl SqliteMeetingStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Run a write, retrying once on a conflict.
    async fn write<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(&Connection) -> Result<T, StoreError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        match with_connection(&self.conn, op.clone()).await {
            Err(StoreError::Conflict(reason)) => {
                warn!(reason = %reason, "Meeting write conflicted, retrying once");
                with_connection(&self.conn, op).await
            }
            other => other,
        }
    }

    pub async fn list_recording_files(&self, key: &MeetingKey) -> Result<Vec<RecordingFile>, StoreError> {
        let key = key.clone();
        with_connection(&self.conn, move |conn| {
            MeetingRepository::list_recording_files(conn, &key)
        })
        .await
    }

    pub async fn get_transcript(
        &self,
        key: &MeetingKey,
        file_object_id: &str,
    ) -> Result<Option<Transcript>, StoreError> {
        let key = key.clone();
        let file_object_id = file_object_id.to_string();
        with_connection(&self.conn, move |conn| {
            MeetingRepository::get_transcript(conn, &key, &file_object_id)
        })
        .await
    }
}

#[async_trait]
impl MeetingStore for SqliteMeetingStore {
    async fn find_by_natural_key(&self, key: &MeetingKey) -> Result<Option<MeetingRecord>, StoreError> {
        let key = key.clone();
        with_connection(&self.conn, move |conn| MeetingRepository::find(conn, &key)).await
    }

    async fn upsert_meeting(
        &self,
        key: &MeetingKey,
        fields: &MeetingFields,
    ) -> Result<MeetingRecord, StoreError> {
        let key = key.clone();
        let fields = fields.clone();
        self.write(move |conn| MeetingRepository::upsert(conn, &key, &fields))
            .await
    }

    async fn append_recording_file(&self, key: &MeetingKey, file: &RecordingFile) -> Result<(), StoreError> {
        let key = key.clone();
        let file = file.clone();
        self.write(move |conn| MeetingRepository::append_recording_file(conn, &key, &file))
            .await
    }

    async fn upsert_transcript(&self, key: &MeetingKey, transcript: &Transcript) -> Result<(), StoreError> {
        let key = key.clone();
        let transcript = transcript.clone();
        self.write(move |conn| MeetingRepository::upsert_transcript(conn, &key, &transcript))
            .await
    }

    async fn advance_status(
        &self,
        key: &MeetingKey,
        to: ProcessingStatus,
    ) -> Result<MeetingRecord, StoreError> {
        let key = key.clone();
        self.write(move |conn| MeetingRepository::advance_status(conn, &key, to))
            .await
    }
}
