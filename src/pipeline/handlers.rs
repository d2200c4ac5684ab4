//! One handler per event type. Each is idempotent: replaying a payload
//! converges on the same rows.

use tracing::{info, warn};

use super::jobs::{FetchTranscriptJob, ResolveRecordingJob};
use super::PipelineContext;
use crate::db::{MeetingFields, MeetingKey, ProcessingStatus, RecordingFile};
use crate::dispatch::Dispatcher;
use crate::events::idempotency;
use crate::events::{EventKind, MeetingInfo, Payload, Provider};
use crate::queue::{EnqueueOptions, JobError, JobType};

pub fn meeting_key(provider: Provider, meeting: &MeetingInfo) -> MeetingKey {
    MeetingKey::new(provider, &meeting.meeting_id, meeting.sub_meeting_id.clone())
}

/// Identity fields every event carries.
pub fn base_fields(meeting: &MeetingInfo) -> MeetingFields {
    MeetingFields {
        subject: meeting.subject.clone(),
        meeting_code: meeting.meeting_code.clone(),
        meeting_type: meeting.meeting_type,
        host_id: meeting.creator.as_ref().map(|c| c.userid.clone()),
        host_name: meeting.creator.as_ref().map(|c| c.user_name.clone()),
        scheduled_start: meeting.start_time,
        scheduled_end: meeting.end_time,
        ..Default::default()
    }
}

fn duration(start: Option<i64>, end: Option<i64>) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => Some(end - start),
        _ => None,
    }
}

pub fn build_dispatcher(ctx: PipelineContext) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    let c = ctx.clone();
    dispatcher.register(EventKind::MeetingStarted, move |provider, payload| {
        let ctx = c.clone();
        async move { meeting_started(&ctx, provider, payload).await }
    });

    let c = ctx.clone();
    dispatcher.register(EventKind::MeetingEnded, move |provider, payload| {
        let ctx = c.clone();
        async move { meeting_ended(&ctx, provider, payload).await }
    });

    for kind in [EventKind::ParticipantJoined, EventKind::ParticipantLeft] {
        let c = ctx.clone();
        dispatcher.register(kind, move |provider, payload| {
            let ctx = c.clone();
            async move { participant_changed(&ctx, provider, payload).await }
        });
    }

    let c = ctx.clone();
    dispatcher.register(EventKind::RecordingCompleted, move |provider, payload| {
        let ctx = c.clone();
        async move { recording_completed(&ctx, provider, payload).await }
    });

    let c = ctx;
    dispatcher.register(EventKind::AllMeetingEnded, move |provider, payload| {
        let ctx = c.clone();
        async move { all_meeting_ended(&ctx, provider, payload).await }
    });

    dispatcher
}

async fn meeting_started(ctx: &PipelineContext, provider: Provider, payload: Payload) -> Result<(), JobError> {
    let meeting = payload.meeting();
    let fields = MeetingFields {
        actual_start: meeting.start_time,
        ..base_fields(meeting)
    };
    ctx.store.upsert_meeting(&meeting_key(provider, meeting), &fields).await?;
    info!(provider = %provider, meeting_id = %meeting.meeting_id, "Meeting started");
    Ok(())
}

async fn meeting_ended(ctx: &PipelineContext, provider: Provider, payload: Payload) -> Result<(), JobError> {
    let meeting = payload.meeting();
    let key = meeting_key(provider, meeting);
    let fields = MeetingFields {
        actual_end: meeting.end_time,
        ..base_fields(meeting)
    };
    let record = ctx.store.upsert_meeting(&key, &fields).await?;

    if record.duration_seconds.is_none() {
        if let Some(seconds) = duration(record.actual_start.or(record.scheduled_start), record.actual_end) {
            let fields = MeetingFields {
                duration_seconds: Some(seconds),
                ..Default::default()
            };
            ctx.store.upsert_meeting(&key, &fields).await?;
        }
    }

    info!(provider = %provider, meeting_id = %meeting.meeting_id, "Meeting ended");
    Ok(())
}

async fn participant_changed(
    ctx: &PipelineContext,
    provider: Provider,
    payload: Payload,
) -> Result<(), JobError> {
    let meeting = payload.meeting();
    ctx.store
        .upsert_meeting(&meeting_key(provider, meeting), &base_fields(meeting))
        .await?;

    if let Payload::ParticipantJoined { participant: Some(p), .. }
    | Payload::ParticipantLeft { participant: Some(p), .. } = &payload
    {
        info!(
            meeting_id = %meeting.meeting_id,
            userid = %p.userid,
            event_type = payload.kind().as_str(),
            "Participant change"
        );
    }
    Ok(())
}

async fn recording_completed(
    ctx: &PipelineContext,
    provider: Provider,
    payload: Payload,
) -> Result<(), JobError> {
    let Payload::RecordingCompleted {
        meeting,
        recording_files,
    } = payload
    else {
        return Err(JobError::Fatal("recording handler got a different payload".to_string()));
    };
    let key = meeting_key(provider, &meeting);

    let fields = MeetingFields {
        has_recording: Some(true),
        recording_status: Some("recorded".to_string()),
        ..base_fields(&meeting)
    };
    ctx.store.upsert_meeting(&key, &fields).await?;
    ctx.store.advance_status(&key, ProcessingStatus::Processing).await?;

    for file in &recording_files {
        ctx.store
            .append_recording_file(
                &key,
                &RecordingFile {
                    file_object_id: file.record_file_id.clone(),
                    url: None,
                    source: provider,
                },
            )
            .await?;
    }

    if ctx.tencent_transcripts.is_none() {
        info!(
            meeting_id = %meeting.meeting_id,
            files = recording_files.len(),
            "Recording stored; transcript API not configured"
        );
        ctx.store.advance_status(&key, ProcessingStatus::Completed).await?;
        return Ok(());
    }

    for file in &recording_files {
        let job = FetchTranscriptJob {
            key: key.clone(),
            file_object_id: file.record_file_id.clone(),
            inflight_token: None,
        };
        let idempotency_key = idempotency::transcript_key(
            provider,
            &key.meeting_id,
            key.sub_meeting_id.as_deref(),
            &file.record_file_id,
        );
        ctx.queue
            .enqueue(
                JobType::TencentFetchTranscript,
                &job,
                &idempotency_key,
                EnqueueOptions::delayed(ctx.settings.transcript_delay),
            )
            .await?;
    }

    info!(
        meeting_id = %meeting.meeting_id,
        files = recording_files.len(),
        "Recording stored, transcript fetch scheduled"
    );
    Ok(())
}

async fn all_meeting_ended(
    ctx: &PipelineContext,
    provider: Provider,
    payload: Payload,
) -> Result<(), JobError> {
    let meeting = payload.meeting().clone();
    let key = meeting_key(provider, &meeting);

    let fields = MeetingFields {
        actual_start: meeting.start_time,
        actual_end: meeting.end_time,
        duration_seconds: duration(meeting.start_time, meeting.end_time),
        ..base_fields(&meeting)
    };
    ctx.store.upsert_meeting(&key, &fields).await?;

    if ctx.lark.is_none() {
        warn!(meeting_id = %meeting.meeting_id, "Lark API not configured, recording not resolved");
        return Ok(());
    }

    let idempotency_key =
        idempotency::resolve_key(provider, &key.meeting_id, key.sub_meeting_id.as_deref());
    ctx.queue
        .enqueue(
            JobType::LarkResolveRecording,
            &ResolveRecordingJob { key, meeting },
            &idempotency_key,
            EnqueueOptions::default(),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UserRef;

    #[test]
    fn test_base_fields_from_meeting() {
        let mut meeting = MeetingInfo::new("m-1");
        meeting.subject = Some("Weekly sync".to_string());
        meeting.creator = Some(UserRef {
            userid: "u-1".to_string(),
            user_name: "Alice".to_string(),
        });
        meeting.start_time = Some(100);

        let fields = base_fields(&meeting);
        assert_eq!(fields.subject.as_deref(), Some("Weekly sync"));
        assert_eq!(fields.host_id.as_deref(), Some("u-1"));
        assert_eq!(fields.host_name.as_deref(), Some("Alice"));
        assert_eq!(fields.scheduled_start, Some(100));
        assert!(fields.has_recording.is_none());
    }

    #[test]
    fn test_duration() {
        assert_eq!(duration(Some(100), Some(160)), Some(60));
        assert_eq!(duration(Some(160), Some(100)), None);
        assert_eq!(duration(None, Some(100)), None);
    }

    #[test]
    fn test_meeting_key_drops_empty_sub_meeting() {
        let mut meeting = MeetingInfo::new("m-1");
        meeting.sub_meeting_id = Some(String::new());
        assert_eq!(meeting_key(Provider::Tencent, &meeting).sub_meeting_id, None);
    }
}
