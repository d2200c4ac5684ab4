//! Webhook event model, parsers and idempotency keys.

mod fields;
pub mod idempotency;
pub mod lark;
pub mod parser;
pub mod types;

use thiserror::Error;

pub use lark::LarkMessage;
pub use types::{
    DecryptedEvent, EventKind, MeetingInfo, ParticipantInfo, Payload, Provider, RecordingFileRef,
    UserRef, WebhookEnvelope,
};

#[derive(Debug, Error)]
pub enum EventError {
    /// Malformed data never becomes valid on retry.
    #[error("field '{field}' is missing or not a {expected}")]
    FormatInvalid {
        field: String,
        expected: &'static str,
    },

    #[error("verification token mismatch")]
    TokenMismatch,
}
