use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::policy::RetryPolicy;

/// Kinds of background work, stored by name in the `jobs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// Dispatch of a decrypted, validated webhook event.
    WebhookEvent,
    /// Poll Lark until a recording's minute token is available.
    LarkResolveRecording,
    LarkFetchTranscript,
    TencentFetchTranscript,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        Self::WebhookEvent,
        Self::LarkResolveRecording,
        Self::LarkFetchTranscript,
        Self::TencentFetchTranscript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebhookEvent => "webhook.event",
            Self::LarkResolveRecording => "lark.resolve_recording",
            Self::LarkFetchTranscript => "lark.fetch_transcript",
            Self::TencentFetchTranscript => "tencent.fetch_transcript",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn policy(&self) -> RetryPolicy {
        match self {
            Self::WebhookEvent => RetryPolicy::lightweight(),
            Self::LarkResolveRecording => RetryPolicy::poller(),
            Self::LarkFetchTranscript | Self::TencentFetchTranscript => RetryPolicy::content(),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A row of the `jobs` table. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub idempotency_key: String,
    pub job_type: JobType,
    /// JSON document, already validated when the job was enqueued.
    pub payload: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_str(&self.payload).map_err(|e| {
            JobError::Fatal(format!("job {} has an unreadable payload: {}", self.id, e))
        })
    }
}

/// How a job failed. The worker uses the variant to decide between a
/// delayed retry and the dead-letter state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("retryable: {0}")]
    Retryable(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(m) | Self::Fatal(m) => m,
        }
    }
}
