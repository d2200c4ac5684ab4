//! Parser and validator for decrypted Tencent Meeting callbacks.
//!
//! ```json
//! {"event": "recording.completed", "trace_id": "...", "payload": [
//!   {"meeting_info": {...}, "recording_files": [{"record_file_id": "..."}]}
//! ]}
//! ```

use serde_json::Value;
use tracing::{debug, info};

use super::fields::{
    as_object, invalid, optional_i64, optional_object, optional_str, required_array,
    required_object, required_str, Object,
};
use super::types::{
    DecryptedEvent, EventKind, MeetingInfo, ParticipantInfo, Payload, Provider, RecordingFileRef,
    UserRef,
};
use super::EventError;

/// Parse and validate a decrypted callback body.
///
/// Unknown event types are accepted with no payloads: the platform owns the
/// catalog and may add types at any time.
pub fn parse(plaintext: &str) -> Result<DecryptedEvent, EventError> {
    let root: Value =
        serde_json::from_str(plaintext).map_err(|_| invalid("$", "JSON object"))?;
    let root = as_object(&root, "$")?;

    let event_type = required_str(root, "", "event")?;
    let trace_id = optional_str(root, "trace_id");

    let Some(kind) = EventKind::from_tencent(&event_type) else {
        info!(event_type = %event_type, "Unhandled Tencent event type, acknowledging");
        return Ok(DecryptedEvent::unhandled(Provider::Tencent, event_type, trace_id));
    };

    let items = required_array(root, "", "payload")?;
    let mut payloads = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let path = format!("payload[{}]", i);
        let obj = as_object(item, &path)?;
        payloads.push(parse_payload(kind, obj, &path)?);
    }

    debug!(
        event_type = %event_type,
        payloads = payloads.len(),
        "Parsed Tencent event"
    );

    Ok(DecryptedEvent {
        provider: Provider::Tencent,
        event_type,
        kind: Some(kind),
        trace_id,
        payloads,
    })
}

fn parse_payload(kind: EventKind, obj: &Object, path: &str) -> Result<Payload, EventError> {
    let info_path = format!("{}.meeting_info", path);
    let info = required_object(obj, path, "meeting_info")?;

    match kind {
        EventKind::RecordingCompleted => {
            let meeting = parse_meeting_info(info, &info_path, true)?;
            let recording_files = parse_recording_files(obj, path)?;
            Ok(Payload::RecordingCompleted {
                meeting,
                recording_files,
            })
        }
        EventKind::MeetingStarted => Ok(Payload::MeetingStarted {
            meeting: parse_meeting_info(info, &info_path, false)?,
        }),
        EventKind::MeetingEnded => Ok(Payload::MeetingEnded {
            meeting: parse_meeting_info(info, &info_path, false)?,
        }),
        EventKind::ParticipantJoined | EventKind::ParticipantLeft => {
            let meeting = parse_meeting_info(info, &info_path, false)?;
            let participant = parse_participant(obj, path)?;
            let operate_time = optional_i64(obj, "operate_time");
            if kind == EventKind::ParticipantJoined {
                Ok(Payload::ParticipantJoined {
                    meeting,
                    participant,
                    operate_time,
                })
            } else {
                Ok(Payload::ParticipantLeft {
                    meeting,
                    participant,
                    operate_time,
                })
            }
        }
        EventKind::AllMeetingEnded => Err(invalid("event", "Tencent event type")),
    }
}

/// `strict` is used by `recording.completed`, which needs the full identity
/// of the meeting to file the recording.
fn parse_meeting_info(info: &Object, path: &str, strict: bool) -> Result<MeetingInfo, EventError> {
    let meeting_id = required_str(info, path, "meeting_id")?;

    let (meeting_code, subject, creator) = if strict {
        let creator_obj = required_object(info, path, "creator")?;
        let creator_path = format!("{}.creator", path);
        (
            Some(required_str(info, path, "meeting_code")?),
            Some(required_str(info, path, "subject")?),
            Some(parse_user(creator_obj, &creator_path)?),
        )
    } else {
        let creator = match optional_object(info, path, "creator")? {
            Some(obj) => parse_user(obj, &format!("{}.creator", path)).ok(),
            None => None,
        };
        (
            optional_str(info, "meeting_code"),
            optional_str(info, "subject"),
            creator,
        )
    };

    Ok(MeetingInfo {
        meeting_id,
        meeting_code,
        subject,
        creator,
        meeting_type: optional_i64(info, "meeting_type"),
        start_time: optional_i64(info, "start_time"),
        end_time: optional_i64(info, "end_time"),
        sub_meeting_id: optional_str(info, "sub_meeting_id"),
    })
}

fn parse_user(obj: &Object, path: &str) -> Result<UserRef, EventError> {
    Ok(UserRef {
        userid: required_str(obj, path, "userid")?,
        user_name: required_str(obj, path, "user_name")?,
    })
}

fn parse_recording_files(obj: &Object, path: &str) -> Result<Vec<RecordingFileRef>, EventError> {
    let files = required_array(obj, path, "recording_files")?;
    if files.is_empty() {
        return Err(invalid(
            format!("{}.recording_files", path),
            "non-empty array",
        ));
    }

    files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let file_path = format!("{}.recording_files[{}]", path, i);
            let file = as_object(file, &file_path)?;
            Ok(RecordingFileRef {
                record_file_id: required_str(file, &file_path, "record_file_id")?,
            })
        })
        .collect()
}

/// Participant details live in `participant_info`; older payloads put the
/// joining user in `operator`.
fn parse_participant(obj: &Object, path: &str) -> Result<Option<ParticipantInfo>, EventError> {
    let (key, inner) = match optional_object(obj, path, "participant_info")? {
        Some(inner) => ("participant_info", inner),
        None => match optional_object(obj, path, "operator")? {
            Some(inner) => ("operator", inner),
            None => return Ok(None),
        },
    };

    let inner_path = format!("{}.{}", path, key);
    Ok(Some(ParticipantInfo {
        userid: required_str(inner, &inner_path, "userid")?,
        user_name: required_str(inner, &inner_path, "user_name")?,
    }))
}
