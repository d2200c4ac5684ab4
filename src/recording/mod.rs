//! Recording and transcript retrieval from provider APIs.

pub mod lark_client;
pub mod poller;
pub mod tencent_client;
pub mod token;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::JobError;

pub use lark_client::LarkClient;
pub use poller::{PollError, PollOutcome, RecordingPoller};
pub use tencent_client::TencentClient;
pub use token::extract_minute_token;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordingApiError {
    /// The provider is still generating the recording. Worth asking again.
    #[error("recording still processing (code {code}): {message}")]
    StillProcessing { code: i64, message: String },

    #[error("provider rejected credentials")]
    Unauthorized,

    #[error("recording not found")]
    NotFound,

    #[error("provider rejected request (code {code}): {message}")]
    BadRequest { code: i64, message: String },

    /// Network failure, timeout, 5xx or rate limit.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response ({status}): {body}")]
    Unexpected { status: u16, body: String },
}

impl RecordingApiError {
    /// Transient at the job level: a later run of the same job may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StillProcessing { .. } | Self::Transport(_))
    }
}

impl From<RecordingApiError> for JobError {
    fn from(err: RecordingApiError) -> Self {
        if err.is_transient() {
            JobError::Retryable(err.to_string())
        } else {
            JobError::Fatal(err.to_string())
        }
    }
}

impl From<reqwest::Error> for RecordingApiError {
    fn from(err: reqwest::Error) -> Self {
        RecordingApiError::Transport(err.to_string())
    }
}

/// A recording as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    /// Share URL carrying the minute token, once the recording is ready.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptRequest {
    pub meeting_id: String,
    /// Tencent record file id or Lark minute token.
    pub file_id: String,
}

#[async_trait]
pub trait RecordingApi: Send + Sync {
    async fn get_recording(&self, meeting_id: &str) -> Result<RecordingInfo, RecordingApiError>;
}

#[async_trait]
pub trait TranscriptApi: Send + Sync {
    async fn fetch_transcript(&self, request: &TranscriptRequest) -> Result<String, RecordingApiError>;
}

/// Map a non-success HTTP status that carries no provider-specific meaning.
pub(crate) fn classify_status(status: u16, body: &str) -> RecordingApiError {
    match status {
        401 | 403 => RecordingApiError::Unauthorized,
        404 => RecordingApiError::NotFound,
        429 | 500..=599 => RecordingApiError::Transport(format!("HTTP {}", status)),
        _ => RecordingApiError::Unexpected {
            status,
            body: body.chars().take(512).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(401, ""), RecordingApiError::Unauthorized);
        assert_eq!(classify_status(404, ""), RecordingApiError::NotFound);
        assert!(classify_status(503, "").is_transient());
        assert!(classify_status(429, "").is_transient());
        assert!(matches!(
            classify_status(418, "teapot"),
            RecordingApiError::Unexpected { status: 418, .. }
        ));
    }

    #[test]
    fn test_job_error_mapping() {
        let retry: JobError = RecordingApiError::StillProcessing {
            code: 124002,
            message: "processing".to_string(),
        }
        .into();
        assert!(retry.is_retryable());

        let fatal: JobError = RecordingApiError::NotFound.into();
        assert!(!fatal.is_retryable());
    }
}
