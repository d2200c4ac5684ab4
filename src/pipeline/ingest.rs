//! Synchronous webhook half: authenticate, decrypt, parse and enqueue.
//!
//! Nothing here waits on a third-party API. A callback is acknowledged as
//! soon as its event is durably queued.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::crypto::{signature, CodecError, LarkCipher, TencentCodec};
use crate::events::idempotency;
use crate::events::lark::{self, LarkMessage};
use crate::events::parser;
use crate::events::{DecryptedEvent, EventError, Provider, WebhookEnvelope};
use crate::queue::{EnqueueOptions, EnqueueOutcome, JobQueue, JobType, QueueError};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("verification token mismatch")]
    TokenMismatch,

    /// Detail stays in the logs.
    #[error("failed to decrypt callback")]
    DecryptionFailed,

    #[error("{0} callbacks are not configured")]
    NotConfigured(Provider),

    #[error("invalid event: {0}")]
    EventFormatInvalid(EventError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl WebhookError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingParameter(_) | Self::EventFormatInvalid(_) => 400,
            Self::SignatureInvalid | Self::TokenMismatch => 403,
            Self::DecryptionFailed | Self::NotConfigured(_) | Self::Queue(_) => 500,
        }
    }
}

impl From<EventError> for WebhookError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::TokenMismatch => Self::TokenMismatch,
            other => Self::EventFormatInvalid(other),
        }
    }
}

fn decryption_failed(provider: Provider, trace_id: &str, err: CodecError) -> WebhookError {
    error!(provider = %provider, trace_id = %trace_id, error = %err, "Callback decryption failed");
    WebhookError::DecryptionFailed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Enqueued(EnqueueOutcome),
    /// Acknowledged without work: no handler exists for the event type.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LarkReply {
    /// Echo for URL verification.
    Challenge(String),
    Accepted(IngestOutcome),
}

#[derive(Debug, Clone)]
pub struct TencentIngest {
    pub token: String,
    pub codec: TencentCodec,
}

#[derive(Debug, Clone, Default)]
pub struct LarkIngest {
    pub cipher: Option<LarkCipher>,
    pub verification_token: Option<String>,
}

pub struct Ingestor {
    tencent: Option<TencentIngest>,
    lark: Option<LarkIngest>,
    queue: JobQueue,
}

impl Ingestor {
    pub fn new(tencent: Option<TencentIngest>, lark: Option<LarkIngest>, queue: JobQueue) -> Self {
        Self {
            tencent,
            lark,
            queue,
        }
    }

    fn tencent(&self) -> Result<&TencentIngest, WebhookError> {
        self.tencent
            .as_ref()
            .ok_or(WebhookError::NotConfigured(Provider::Tencent))
    }

    /// URL validation handshake. Returns the decrypted `check_str`.
    pub fn verify_tencent_url(
        &self,
        timestamp: Option<&str>,
        nonce: Option<&str>,
        signature: Option<&str>,
        check_str: Option<&str>,
    ) -> Result<String, WebhookError> {
        let timestamp = timestamp.ok_or(WebhookError::MissingParameter("timestamp"))?;
        let nonce = nonce.ok_or(WebhookError::MissingParameter("nonce"))?;
        let signature = signature.ok_or(WebhookError::MissingParameter("signature"))?;
        // Query decoding turns '+' into a space.
        let check_str = check_str
            .ok_or(WebhookError::MissingParameter("check_str"))?
            .replace(' ', "+");

        let tencent = self.tencent()?;
        if !signature::verify(&tencent.token, timestamp, nonce, &check_str, signature) {
            warn!("Tencent URL verification signature rejected");
            return Err(WebhookError::SignatureInvalid);
        }

        tencent
            .codec
            .decrypt(&check_str)
            .map_err(|e| decryption_failed(Provider::Tencent, "url-verification", e))
    }

    pub async fn ingest_tencent(&self, envelope: WebhookEnvelope) -> Result<IngestOutcome, WebhookError> {
        for (name, value) in [
            ("timestamp", &envelope.raw_timestamp),
            ("nonce", &envelope.nonce),
            ("signature", &envelope.signature),
            ("data", &envelope.ciphertext),
        ] {
            if value.is_empty() {
                return Err(WebhookError::MissingParameter(name));
            }
        }

        let tencent = self.tencent()?;
        if !signature::verify(
            &tencent.token,
            &envelope.raw_timestamp,
            &envelope.nonce,
            &envelope.ciphertext,
            &envelope.signature,
        ) {
            warn!(trace_id = %envelope.trace_id, "Tencent callback signature rejected");
            return Err(WebhookError::SignatureInvalid);
        }

        let plaintext = tencent
            .codec
            .decrypt(&envelope.ciphertext)
            .map_err(|e| decryption_failed(Provider::Tencent, &envelope.trace_id, e))?;

        let event = parser::parse(&plaintext)?;
        debug!(
            trace_id = %envelope.trace_id,
            event_type = %event.event_type,
            payloads = event.payloads.len(),
            "Tencent callback decoded"
        );
        self.enqueue_event(event).await
    }

    /// Handle a Lark callback body, encrypted or plain.
    pub async fn ingest_lark(&self, body: &str) -> Result<LarkReply, WebhookError> {
        let lark = self
            .lark
            .as_ref()
            .ok_or(WebhookError::NotConfigured(Provider::Lark))?;

        let plaintext = match (lark::encrypted_field(body), &lark.cipher) {
            (Some(encrypted), Some(cipher)) => cipher
                .decrypt(&encrypted)
                .map_err(|e| decryption_failed(Provider::Lark, "-", e))?,
            (Some(_), None) => {
                error!("Encrypted Lark callback received but no encrypt key is configured");
                return Err(WebhookError::NotConfigured(Provider::Lark));
            }
            (None, _) => body.to_string(),
        };

        match lark::parse(&plaintext, lark.verification_token.as_deref())? {
            LarkMessage::Challenge(challenge) => {
                info!("Answering Lark URL verification");
                Ok(LarkReply::Challenge(challenge))
            }
            LarkMessage::Event(event) => Ok(LarkReply::Accepted(self.enqueue_event(event).await?)),
        }
    }

    async fn enqueue_event(&self, event: DecryptedEvent) -> Result<IngestOutcome, WebhookError> {
        if event.kind.is_none() {
            info!(provider = %event.provider, event_type = %event.event_type, "No handler for event type, acknowledged");
            return Ok(IngestOutcome::Ignored);
        }

        let key = idempotency::event_key(&event);
        let outcome = self
            .queue
            .enqueue(JobType::WebhookEvent, &event, &key, EnqueueOptions::default())
            .await?;
        Ok(IngestOutcome::Enqueued(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    const TOKEN: &str = "callback-token";
    const ENCODING_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY";

    fn queue() -> JobQueue {
        let conn = Connection::open_in_memory().unwrap();
        db::migrate(&conn).unwrap();
        JobQueue::new(db::shared(conn))
    }

    fn ingestor() -> (Ingestor, JobQueue) {
        let queue = queue();
        let tencent = TencentIngest {
            token: TOKEN.to_string(),
            codec: TencentCodec::from_encoding_key(ENCODING_KEY).unwrap(),
        };
        let lark = LarkIngest {
            cipher: Some(LarkCipher::new("lark-key")),
            verification_token: Some("vtoken".to_string()),
        };
        (Ingestor::new(Some(tencent), Some(lark), queue.clone()), queue)
    }

    fn signed_envelope(ingestor: &Ingestor, plaintext: &str) -> WebhookEnvelope {
        let codec = &ingestor.tencent.as_ref().unwrap().codec;
        let data = codec.encrypt(plaintext);
        let sig = signature::compute_signature(TOKEN, "1700000000", "42", &data);
        WebhookEnvelope::new(Provider::Tencent, "1700000000", "42", sig, data)
    }

    const RECORDING_EVENT: &str = r#"{
        "event": "recording.completed",
        "trace_id": "t-1",
        "payload": [{
            "operate_time": 1700000100000,
            "meeting_info": {
                "meeting_id": "m-1",
                "meeting_code": "123456789",
                "subject": "Weekly sync",
                "creator": {"userid": "u-1", "user_name": "Alice"},
                "meeting_type": 0,
                "start_time": 1700000000,
                "end_time": 1700003600
            },
            "recording_files": [{"record_file_id": "rf-1"}]
        }]
    }"#;

    #[tokio::test]
    async fn test_tencent_event_enqueued_once() {
        let (ingestor, queue) = ingestor();

        let first = ingestor
            .ingest_tencent(signed_envelope(&ingestor, RECORDING_EVENT))
            .await
            .unwrap();
        let IngestOutcome::Enqueued(EnqueueOutcome::Enqueued(id)) = first else {
            panic!("expected a new job, got {:?}", first);
        };

        let second = ingestor
            .ingest_tencent(signed_envelope(&ingestor, RECORDING_EVENT))
            .await
            .unwrap();
        assert_eq!(second, IngestOutcome::Enqueued(EnqueueOutcome::Duplicate(id)));

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.job_type, JobType::WebhookEvent);
    }

    #[tokio::test]
    async fn test_tencent_bad_signature_rejected() {
        let (ingestor, _) = ingestor();
        let mut envelope = signed_envelope(&ingestor, RECORDING_EVENT);
        envelope.signature = "0".repeat(40);

        let err = ingestor.ingest_tencent(envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::SignatureInvalid));
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_tencent_missing_header() {
        let (ingestor, _) = ingestor();
        let mut envelope = signed_envelope(&ingestor, RECORDING_EVENT);
        envelope.nonce.clear();

        let err = ingestor.ingest_tencent(envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::MissingParameter("nonce")));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_tencent_garbage_ciphertext_is_generic_500() {
        let (ingestor, _) = ingestor();
        let data = "bm90IGEgcmVhbCBjaXBoZXJ0ZXh0";
        let sig = signature::compute_signature(TOKEN, "1", "2", data);
        let envelope = WebhookEnvelope::new(Provider::Tencent, "1", "2", sig, data);

        let err = ingestor.ingest_tencent(envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::DecryptionFailed));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "failed to decrypt callback");
    }

    #[tokio::test]
    async fn test_tencent_unknown_event_ignored() {
        let (ingestor, queue) = ingestor();
        let envelope = signed_envelope(&ingestor, r#"{"event":"meeting.created","payload":[]}"#);

        let outcome = ingestor.ingest_tencent(envelope).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert!(queue.count_by_status().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tencent_malformed_event_is_400() {
        let (ingestor, _) = ingestor();
        let envelope = signed_envelope(
            &ingestor,
            r#"{"event":"meeting.started","payload":[{"meeting_info":{}}]}"#,
        );

        let err = ingestor.ingest_tencent(envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::EventFormatInvalid(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_url_verification() {
        let (ingestor, _) = ingestor();
        let codec = &ingestor.tencent.as_ref().unwrap().codec;
        let check_str = codec.encrypt("hello-check");
        let sig = signature::compute_signature(TOKEN, "1", "2", &check_str);
        // Simulate '+' lost to form decoding.
        let mangled = check_str.replace('+', " ");

        let plain = ingestor
            .verify_tencent_url(Some("1"), Some("2"), Some(&sig), Some(&mangled))
            .unwrap();
        assert_eq!(plain, "hello-check");

        let err = ingestor
            .verify_tencent_url(Some("1"), Some("2"), None, Some(&check_str))
            .unwrap_err();
        assert!(matches!(err, WebhookError::MissingParameter("signature")));
    }

    #[tokio::test]
    async fn test_lark_challenge_and_event() {
        let (ingestor, queue) = ingestor();
        let cipher = LarkCipher::new("lark-key");

        let challenge = cipher.encrypt(r#"{"challenge":"c-1","token":"vtoken","type":"url_verification"}"#);
        let reply = ingestor
            .ingest_lark(&serde_json::json!({ "encrypt": challenge }).to_string())
            .await
            .unwrap();
        assert_eq!(reply, LarkReply::Challenge("c-1".to_string()));

        let event = r#"{
            "schema": "2.0",
            "header": {"event_id": "e-1", "event_type": "vc.meeting.all_meeting_ended_v1", "token": "vtoken"},
            "event": {"meeting": {"id": "om-1", "topic": "Planning", "start_time": "1700000000", "end_time": "1700003600"}}
        }"#;
        let reply = ingestor
            .ingest_lark(&serde_json::json!({ "encrypt": cipher.encrypt(event) }).to_string())
            .await
            .unwrap();
        assert!(matches!(
            reply,
            LarkReply::Accepted(IngestOutcome::Enqueued(EnqueueOutcome::Enqueued(_)))
        ));
        assert_eq!(queue.count_by_status().await.unwrap(), vec![("queued".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_lark_wrong_token_is_403() {
        let (ingestor, _) = ingestor();
        let body = r#"{"challenge":"c-1","token":"other","type":"url_verification"}"#;

        let err = ingestor.ingest_lark(body).await.unwrap_err();
        assert!(matches!(err, WebhookError::TokenMismatch));
        assert_eq!(err.status_code(), 403);
    }
}
