use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conferencing platform that sent a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Tencent,
    Lark,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tencent => "tencent",
            Self::Lark => "lark",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "tencent" => Some(Self::Tencent),
            "lark" | "feishu" => Some(Self::Lark),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event types we know how to parse. Anything else is acknowledged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RecordingCompleted,
    MeetingStarted,
    MeetingEnded,
    ParticipantJoined,
    ParticipantLeft,
    AllMeetingEnded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordingCompleted => "recording.completed",
            Self::MeetingStarted => "meeting.started",
            Self::MeetingEnded => "meeting.ended",
            Self::ParticipantJoined => "participant.joined",
            Self::ParticipantLeft => "participant.left",
            Self::AllMeetingEnded => "vc.meeting.all_meeting_ended_v1",
        }
    }

    pub fn from_tencent(event_type: &str) -> Option<EventKind> {
        match event_type {
            "recording.completed" => Some(Self::RecordingCompleted),
            "meeting.started" => Some(Self::MeetingStarted),
            "meeting.ended" | "meeting.end" => Some(Self::MeetingEnded),
            "participant.joined" => Some(Self::ParticipantJoined),
            "participant.left" => Some(Self::ParticipantLeft),
            _ => None,
        }
    }

    pub fn from_lark(event_type: &str) -> Option<EventKind> {
        match event_type {
            "vc.meeting.all_meeting_ended_v1" => Some(Self::AllMeetingEnded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub userid: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub meeting_id: String,
    pub meeting_code: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<UserRef>,
    pub meeting_type: Option<i64>,
    /// Epoch seconds.
    pub start_time: Option<i64>,
    /// Epoch seconds.
    pub end_time: Option<i64>,
    pub sub_meeting_id: Option<String>,
}

impl MeetingInfo {
    pub fn new(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            meeting_code: None,
            subject: None,
            creator: None,
            meeting_type: None,
            start_time: None,
            end_time: None,
            sub_meeting_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFileRef {
    pub record_file_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub userid: String,
    pub user_name: String,
}

/// One validated payload. The variant is fixed by the event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    RecordingCompleted {
        meeting: MeetingInfo,
        recording_files: Vec<RecordingFileRef>,
    },
    MeetingStarted {
        meeting: MeetingInfo,
    },
    MeetingEnded {
        meeting: MeetingInfo,
    },
    ParticipantJoined {
        meeting: MeetingInfo,
        participant: Option<ParticipantInfo>,
        /// Milliseconds, when the platform reports it.
        operate_time: Option<i64>,
    },
    ParticipantLeft {
        meeting: MeetingInfo,
        participant: Option<ParticipantInfo>,
        operate_time: Option<i64>,
    },
    AllMeetingEnded {
        meeting: MeetingInfo,
    },
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RecordingCompleted { .. } => EventKind::RecordingCompleted,
            Self::MeetingStarted { .. } => EventKind::MeetingStarted,
            Self::MeetingEnded { .. } => EventKind::MeetingEnded,
            Self::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            Self::ParticipantLeft { .. } => EventKind::ParticipantLeft,
            Self::AllMeetingEnded { .. } => EventKind::AllMeetingEnded,
        }
    }

    pub fn meeting(&self) -> &MeetingInfo {
        match self {
            Self::RecordingCompleted { meeting, .. }
            | Self::MeetingStarted { meeting }
            | Self::MeetingEnded { meeting }
            | Self::ParticipantJoined { meeting, .. }
            | Self::ParticipantLeft { meeting, .. }
            | Self::AllMeetingEnded { meeting } => meeting,
        }
    }
}

/// A decrypted, validated callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedEvent {
    pub provider: Provider,
    /// Raw event type string as sent by the platform.
    pub event_type: String,
    /// `None` for event types the platform added that we don't handle.
    pub kind: Option<EventKind>,
    pub trace_id: Option<String>,
    pub payloads: Vec<Payload>,
}

impl DecryptedEvent {
    pub fn unhandled(provider: Provider, event_type: String, trace_id: Option<String>) -> Self {
        Self {
            provider,
            event_type,
            kind: None,
            trace_id,
            payloads: Vec::new(),
        }
    }
}

/// Transport-level view of an inbound callback, built on receipt.
/// Dropped once the body has been decrypted.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub provider: Provider,
    /// Local correlation id for logs.
    pub trace_id: String,
    pub received_at: DateTime<Utc>,
    pub raw_timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub ciphertext: String,
}

impl WebhookEnvelope {
    pub fn new(
        provider: Provider,
        raw_timestamp: impl Into<String>,
        nonce: impl Into<String>,
        signature: impl Into<String>,
        ciphertext: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            trace_id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
            raw_timestamp: raw_timestamp.into(),
            nonce: nonce.into(),
            signature: signature.into(),
            ciphertext: ciphertext.into(),
        }
    }
}
