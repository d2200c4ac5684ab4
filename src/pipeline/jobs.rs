//! Job payloads and the processor that runs them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::handlers::{base_fields, build_dispatcher};
use super::PipelineContext;
use crate::db::{MeetingFields, MeetingKey, ProcessingStatus, RecordingFile, Transcript};
use crate::dispatch::Dispatcher;
use crate::events::idempotency;
use crate::events::{DecryptedEvent, MeetingInfo, Provider};
use crate::queue::{EnqueueOptions, EnqueueOutcome, Job, JobError, JobProcessor, JobType};
use crate::recording::{PollError, PollOutcome, RecordingPoller, TranscriptRequest};

/// Find the minute token of a Lark meeting's recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRecordingJob {
    pub key: MeetingKey,
    pub meeting: MeetingInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTranscriptJob {
    pub key: MeetingKey,
    /// Record file id or minute token.
    pub file_object_id: String,
    /// In-flight token to release once the fetch is finished.
    pub inflight_token: Option<String>,
}

pub struct PipelineProcessor {
    ctx: PipelineContext,
    dispatcher: Dispatcher,
}

impl PipelineProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        let dispatcher = build_dispatcher(ctx.clone());
        Self { ctx, dispatcher }
    }

    async fn run_event(&self, job: &Job) -> Result<(), JobError> {
        let event: DecryptedEvent = job.decode()?;
        let Some(kind) = event.kind else {
            return Ok(());
        };

        let report = self
            .dispatcher
            .dispatch(event.provider, kind, event.payloads)
            .await
            .map_err(|e| JobError::Fatal(e.to_string()))?;
        report.into_job_result()
    }

    async fn resolve_recording(&self, job: &Job) -> Result<(), JobError> {
        let payload: ResolveRecordingJob = job.decode()?;
        let lark = self
            .ctx
            .lark
            .as_ref()
            .ok_or_else(|| JobError::Fatal("Lark API is not configured".to_string()))?;
        let key = &payload.key;
        let store = &self.ctx.store;

        store.upsert_meeting(key, &base_fields(&payload.meeting)).await?;
        store.advance_status(key, ProcessingStatus::Processing).await?;

        let poller = RecordingPoller::new(lark.recordings.clone()).with_schedule(
            self.ctx.settings.poll_max_attempts,
            self.ctx.settings.poll_interval,
        );

        let token = match poller.poll_for_token(&key.meeting_id).await {
            Ok(PollOutcome::Found(token)) => token,
            Ok(PollOutcome::NotFound) => {
                info!(meeting = %key, "No recording available, closing meeting");
                let fields = MeetingFields {
                    recording_status: Some("unavailable".to_string()),
                    ..Default::default()
                };
                store.upsert_meeting(key, &fields).await?;
                store.advance_status(key, ProcessingStatus::Completed).await?;
                return Ok(());
            }
            Err(PollError::Permanent(e)) => return Err(e.into()),
        };

        if !self.ctx.inflight.try_acquire(&token, &job.idempotency_key).await? {
            info!(meeting = %key, token = %token, "Recording already being fetched elsewhere");
            return Ok(());
        }

        let fields = MeetingFields {
            has_recording: Some(true),
            recording_status: Some("recorded".to_string()),
            ..Default::default()
        };
        store.upsert_meeting(key, &fields).await?;
        store
            .append_recording_file(
                key,
                &RecordingFile {
                    file_object_id: token.clone(),
                    url: None,
                    source: Provider::Lark,
                },
            )
            .await?;

        let fetch = FetchTranscriptJob {
            key: key.clone(),
            file_object_id: token.clone(),
            inflight_token: Some(token.clone()),
        };
        let fetch_key = idempotency::transcript_key(
            Provider::Lark,
            &key.meeting_id,
            key.sub_meeting_id.as_deref(),
            &token,
        );
        let outcome = self
            .ctx
            .queue
            .enqueue(
                JobType::LarkFetchTranscript,
                &fetch,
                &fetch_key,
                EnqueueOptions::delayed(self.ctx.settings.transcript_delay),
            )
            .await?;

        if outcome == EnqueueOutcome::AlreadyCompleted {
            self.ctx.inflight.release(&token).await?;
        }
        Ok(())
    }

    async fn fetch_transcript(&self, job: &Job) -> Result<(), JobError> {
        let payload: FetchTranscriptJob = job.decode()?;
        let api = match job.job_type {
            JobType::LarkFetchTranscript => self.ctx.lark.as_ref().map(|l| l.transcripts.clone()),
            _ => self.ctx.tencent_transcripts.clone(),
        }
        .ok_or_else(|| JobError::Fatal(format!("{} API is not configured", payload.key.platform)))?;

        let request = TranscriptRequest {
            meeting_id: payload.key.meeting_id.clone(),
            file_id: payload.file_object_id.clone(),
        };
        let text = api.fetch_transcript(&request).await?;

        self.ctx
            .store
            .upsert_transcript(
                &payload.key,
                &Transcript {
                    file_object_id: payload.file_object_id.clone(),
                    text,
                },
            )
            .await?;
        self.ctx
            .store
            .advance_status(&payload.key, ProcessingStatus::Completed)
            .await?;

        if let Some(token) = &payload.inflight_token {
            self.ctx.inflight.release(token).await?;
        }

        info!(meeting = %payload.key, file = %payload.file_object_id, "Transcript stored");
        Ok(())
    }

    async fn mark_failed(&self, key: &MeetingKey) {
        if let Err(e) = self.ctx.store.advance_status(key, ProcessingStatus::Failed).await {
            error!(meeting = %key, error = %e, "Failed to mark meeting as failed");
        }
    }
}

#[async_trait]
impl JobProcessor for PipelineProcessor {
    async fn process(&self, job: &Job) -> Result<(), JobError> {
        match job.job_type {
            JobType::WebhookEvent => self.run_event(job).await,
            JobType::LarkResolveRecording => self.resolve_recording(job).await,
            JobType::LarkFetchTranscript | JobType::TencentFetchTranscript => {
                self.fetch_transcript(job).await
            }
        }
    }

    async fn on_dead(&self, job: &Job, error: &JobError) {
        match job.job_type {
            JobType::WebhookEvent => {
                warn!(job_id = job.id, error = %error, "Webhook event dropped to dead letters");
            }
            JobType::LarkResolveRecording => {
                if let Ok(payload) = job.decode::<ResolveRecordingJob>() {
                    self.mark_failed(&payload.key).await;
                }
            }
            JobType::LarkFetchTranscript | JobType::TencentFetchTranscript => {
                let Ok(payload) = job.decode::<FetchTranscriptJob>() else {
                    return;
                };
                if let Some(token) = &payload.inflight_token {
                    if let Err(e) = self.ctx.inflight.release(token).await {
                        error!(token = %token, error = %e, "Failed to release in-flight token");
                    }
                }
                self.mark_failed(&payload.key).await;
            }
        }
    }
}
