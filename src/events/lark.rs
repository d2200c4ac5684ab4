//! Parser for Lark (Feishu) event callbacks, schema 2.0.
//!
//! A callback is either a URL verification challenge or an event whose
//! header carries the app's verification token.

use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::info;

use super::fields::{
    as_object, invalid, optional_i64, optional_object, optional_str, required_object,
    required_str, Object,
};
use super::types::{DecryptedEvent, EventKind, MeetingInfo, Payload, Provider, UserRef};
use super::EventError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LarkMessage {
    /// URL verification; the challenge must be echoed back.
    Challenge(String),
    Event(DecryptedEvent),
}

/// The encrypted form of a body, when the app has an encrypt key.
pub fn encrypted_field(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("encrypt")?.as_str().map(str::to_string)
}

pub fn parse(plaintext: &str, verification_token: Option<&str>) -> Result<LarkMessage, EventError> {
    let root: Value =
        serde_json::from_str(plaintext).map_err(|_| invalid("$", "JSON object"))?;
    let root = as_object(&root, "$")?;

    if let Some(challenge) = optional_str(root, "challenge") {
        check_token(optional_str(root, "token").as_deref(), verification_token)?;
        return Ok(LarkMessage::Challenge(challenge));
    }

    let header = required_object(root, "", "header")?;
    let event_type = required_str(header, "header", "event_type")?;
    check_token(optional_str(header, "token").as_deref(), verification_token)?;
    let trace_id = optional_str(header, "event_id");

    let Some(kind) = EventKind::from_lark(&event_type) else {
        info!(event_type = %event_type, "Unhandled Lark event type, acknowledging");
        return Ok(LarkMessage::Event(DecryptedEvent::unhandled(
            Provider::Lark,
            event_type,
            trace_id,
        )));
    };

    let event = required_object(root, "", "event")?;
    let meeting = parse_meeting(required_object(event, "event", "meeting")?, "event.meeting")?;

    let payload = match kind {
        EventKind::AllMeetingEnded => Payload::AllMeetingEnded { meeting },
        _ => return Err(invalid("header.event_type", "Lark event type")),
    };

    Ok(LarkMessage::Event(DecryptedEvent {
        provider: Provider::Lark,
        event_type,
        kind: Some(kind),
        trace_id,
        payloads: vec![payload],
    }))
}

fn check_token(supplied: Option<&str>, expected: Option<&str>) -> Result<(), EventError> {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let supplied = supplied.unwrap_or_default();
    if bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(EventError::TokenMismatch)
    }
}

fn parse_meeting(meeting: &Object, path: &str) -> Result<MeetingInfo, EventError> {
    let meeting_id = required_str(meeting, path, "id")?;

    let host = ["host_user", "owner"]
        .iter()
        .find_map(|key| parse_user(meeting, path, key).transpose())
        .transpose()?;

    Ok(MeetingInfo {
        meeting_id,
        meeting_code: optional_str(meeting, "meeting_no"),
        subject: optional_str(meeting, "topic"),
        creator: host,
        meeting_type: None,
        start_time: optional_i64(meeting, "start_time"),
        end_time: optional_i64(meeting, "end_time"),
        sub_meeting_id: None,
    })
}

/// `{"id": {"open_id": "..", "user_id": ".."}, "user_name": ".."}`
fn parse_user(meeting: &Object, path: &str, key: &str) -> Result<Option<UserRef>, EventError> {
    let Some(user) = optional_object(meeting, path, key)? else {
        return Ok(None);
    };
    let user_path = format!("{}.{}", path, key);
    let Some(ids) = optional_object(user, &user_path, "id")? else {
        return Ok(None);
    };
    let Some(userid) = optional_str(ids, "open_id").or_else(|| optional_str(ids, "user_id")) else {
        return Ok(None);
    };
    Ok(Some(UserRef {
        userid,
        user_name: optional_str(user, "user_name").unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meeting_ended(token: &str) -> Value {
        json!({
            "schema": "2.0",
            "header": {
                "event_id": "evt-1",
                "event_type": "vc.meeting.all_meeting_ended_v1",
                "create_time": "1700003600000",
                "token": token,
                "app_id": "cli_a1"
            },
            "event": {
                "meeting": {
                    "id": "6911188411934433028",
                    "topic": "Design review",
                    "meeting_no": "235812466",
                    "start_time": "1700000000",
                    "end_time": "1700003600",
                    "host_user": {"id": {"open_id": "ou_123", "user_id": "u1"}, "user_name": "Carol"}
                }
            }
        })
    }

    #[test]
    fn test_challenge() {
        let body = json!({"challenge": "abc", "token": "vt", "type": "url_verification"});
        let msg = parse(&body.to_string(), Some("vt")).unwrap();
        assert_eq!(msg, LarkMessage::Challenge("abc".to_string()));
    }

    #[test]
    fn test_challenge_with_wrong_token() {
        let body = json!({"challenge": "abc", "token": "nope", "type": "url_verification"});
        assert!(matches!(
            parse(&body.to_string(), Some("vt")),
            Err(EventError::TokenMismatch)
        ));
    }

    #[test]
    fn test_meeting_ended_event() {
        let msg = parse(&meeting_ended("vt").to_string(), Some("vt")).unwrap();
        let LarkMessage::Event(event) = msg else {
            panic!("expected event");
        };
        assert_eq!(event.provider, Provider::Lark);
        assert_eq!(event.kind, Some(EventKind::AllMeetingEnded));
        assert_eq!(event.trace_id.as_deref(), Some("evt-1"));

        let meeting = event.payloads[0].meeting();
        assert_eq!(meeting.meeting_id, "6911188411934433028");
        assert_eq!(meeting.subject.as_deref(), Some("Design review"));
        assert_eq!(meeting.start_time, Some(1_700_000_000));
        let host = meeting.creator.as_ref().unwrap();
        assert_eq!(host.userid, "ou_123");
        assert_eq!(host.user_name, "Carol");
    }

    #[test]
    fn test_event_token_checked() {
        assert!(matches!(
            parse(&meeting_ended("other").to_string(), Some("vt")),
            Err(EventError::TokenMismatch)
        ));
        // No token configured: accepted.
        assert!(parse(&meeting_ended("other").to_string(), None).is_ok());
    }

    #[test]
    fn test_unknown_lark_event() {
        let body = json!({
            "schema": "2.0",
            "header": {"event_type": "im.message.receive_v1", "token": "vt"},
            "event": {}
        });
        let LarkMessage::Event(event) = parse(&body.to_string(), Some("vt")).unwrap() else {
            panic!("expected event");
        };
        assert!(event.kind.is_none());
        assert!(event.payloads.is_empty());
    }

    #[test]
    fn test_missing_meeting_id() {
        let mut body = meeting_ended("vt");
        body["event"]["meeting"].as_object_mut().unwrap().remove("id");
        match parse(&body.to_string(), Some("vt")).unwrap_err() {
            EventError::FormatInvalid { field, .. } => assert_eq!(field, "event.meeting.id"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_encrypted_field() {
        assert_eq!(
            encrypted_field(r#"{"encrypt":"Zm9v"}"#),
            Some("Zm9v".to_string())
        );
        assert_eq!(encrypted_field(r#"{"challenge":"x"}"#), None);
        assert_eq!(encrypted_field("garbage"), None);
    }
}
