//! Bounded "poll until ready" loop for recordings whose minute token is not
//! available when the meeting-ended event fires.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::token::extract_minute_token;
use super::{RecordingApi, RecordingApiError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 24;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Found(String),
    /// Attempts exhausted without a usable token.
    NotFound,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    /// A response that will not change by asking again.
    #[error("recording permanently unavailable: {0}")]
    Permanent(RecordingApiError),
}

pub struct RecordingPoller {
    api: Arc<dyn RecordingApi>,
    max_attempts: u32,
    interval: Duration,
}

impl RecordingPoller {
    pub fn new(api: Arc<dyn RecordingApi>) -> Self {
        Self {
            api,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_schedule(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.interval = interval;
        self
    }

    pub async fn poll_for_token(&self, meeting_id: &str) -> Result<PollOutcome, PollError> {
        for attempt in 1..=self.max_attempts {
            match self.api.get_recording(meeting_id).await {
                Ok(info) => {
                    if let Some(token) = info.url.as_deref().and_then(extract_minute_token) {
                        info!(meeting_id = %meeting_id, attempt, "Recording token resolved");
                        return Ok(PollOutcome::Found(token));
                    }
                    debug!(
                        meeting_id = %meeting_id,
                        attempt,
                        url = ?info.url,
                        "Recording has no usable URL yet"
                    );
                }
                Err(e @ RecordingApiError::StillProcessing { .. }) => {
                    debug!(meeting_id = %meeting_id, attempt, error = %e, "Recording still processing");
                }
                Err(e) => {
                    warn!(meeting_id = %meeting_id, attempt, error = %e, "Recording lookup failed");
                    return Err(PollError::Permanent(e));
                }
            }

            if attempt < self.max_attempts {
                sleep(self.interval).await;
            }
        }

        info!(
            meeting_id = %meeting_id,
            attempts = self.max_attempts,
            "No recording token after all attempts"
        );
        Ok(PollOutcome::NotFound)
    }
}
