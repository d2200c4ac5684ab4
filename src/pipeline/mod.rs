//! Webhook-to-database pipeline.
//!
//! `ingest` is the synchronous HTTP half: verify, decrypt, parse, enqueue.
//! `handlers` and `jobs` are the asynchronous half run by queue workers.

pub mod handlers;
pub mod ingest;
pub mod jobs;

use std::sync::Arc;
use std::time::Duration;

use crate::db::MeetingStore;
use crate::queue::{InflightRegistry, JobQueue};
use crate::recording::{poller, RecordingApi, TranscriptApi};

pub use ingest::{IngestOutcome, Ingestor, LarkIngest, LarkReply, TencentIngest, WebhookError};
pub use jobs::{FetchTranscriptJob, PipelineProcessor, ResolveRecordingJob};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Wait between a recording becoming known and fetching its transcript.
    pub transcript_delay: Duration,
    pub poll_max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            transcript_delay: Duration::from_secs(180),
            poll_max_attempts: poller::DEFAULT_MAX_ATTEMPTS,
            poll_interval: poller::DEFAULT_INTERVAL,
        }
    }
}

#[derive(Clone)]
pub struct LarkApis {
    pub recordings: Arc<dyn RecordingApi>,
    pub transcripts: Arc<dyn TranscriptApi>,
}

/// Dependencies shared by event handlers and job processors.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn MeetingStore>,
    pub queue: JobQueue,
    pub inflight: InflightRegistry,
    pub settings: PipelineSettings,
    pub tencent_transcripts: Option<Arc<dyn TranscriptApi>>,
    pub lark: Option<LarkApis>,
}

#[cfg(test)]
mod tests;
