//! Deterministic idempotency keys.
//!
//! A key identifies one logical unit of work:
//! `provider:event_type:meeting_id:sub_meeting_id:discriminator`.

use sha2::{Digest, Sha256};

use super::types::{DecryptedEvent, Payload, Provider};

const NONE: &str = "-";

/// An absent or empty sub-meeting id keys the same way `MeetingKey` stores it.
fn sub_segment(sub_meeting_id: Option<&str>) -> &str {
    sub_meeting_id.filter(|s| !s.is_empty()).unwrap_or(NONE)
}

pub fn payload_key(provider: Provider, payload: &Payload) -> String {
    let meeting = payload.meeting();
    let discriminator = match payload {
        Payload::RecordingCompleted {
            recording_files, ..
        } => recording_files
            .iter()
            .map(|f| f.record_file_id.as_str())
            .collect::<Vec<_>>()
            .join(","),
        Payload::ParticipantJoined {
            participant,
            operate_time,
            ..
        }
        | Payload::ParticipantLeft {
            participant,
            operate_time,
            ..
        } => format!(
            "{}@{}",
            participant.as_ref().map(|p| p.userid.as_str()).unwrap_or(NONE),
            operate_time.map(|t| t.to_string()).unwrap_or_else(|| NONE.to_string())
        ),
        _ => NONE.to_string(),
    };

    format!(
        "{}:{}:{}:{}:{}",
        provider.as_str(),
        payload.kind().as_str(),
        meeting.meeting_id,
        sub_segment(meeting.sub_meeting_id.as_deref()),
        discriminator
    )
}

/// Key for a whole callback. Single-payload events reuse the payload key;
/// batches hash the sorted payload keys.
pub fn event_key(event: &DecryptedEvent) -> String {
    let mut keys: Vec<String> = event
        .payloads
        .iter()
        .map(|p| payload_key(event.provider, p))
        .collect();

    match keys.len() {
        0 => format!(
            "{}:{}:{}",
            event.provider.as_str(),
            event.event_type,
            event.trace_id.as_deref().unwrap_or(NONE)
        ),
        1 => keys.remove(0),
        _ => {
            keys.sort();
            let digest = Sha256::digest(keys.join("|").as_bytes());
            format!(
                "{}:{}:batch:{}",
                event.provider.as_str(),
                event.event_type,
                hex::encode(digest)
            )
        }
    }
}

/// Key for resolving the recording of a meeting.
pub fn resolve_key(provider: Provider, meeting_id: &str, sub_meeting_id: Option<&str>) -> String {
    format!(
        "{}:resolve_recording:{}:{}",
        provider.as_str(),
        meeting_id,
        sub_segment(sub_meeting_id)
    )
}

/// Key for fetching one transcript; `artifact` is a record file id or minute token.
pub fn transcript_key(
    provider: Provider,
    meeting_id: &str,
    sub_meeting_id: Option<&str>,
    artifact: &str,
) -> String {
    format!(
        "{}:fetch_transcript:{}:{}:{}",
        provider.as_str(),
        meeting_id,
        sub_segment(sub_meeting_id),
        artifact
    )
}
