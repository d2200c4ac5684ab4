//! Tencent Meeting REST client for recording transcripts.
//!
//! Requests are signed with the platform's HMAC-SHA256 header scheme.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use super::{classify_status, RecordingApiError, TranscriptApi, TranscriptRequest};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct TencentClientConfig {
    pub base_url: String,
    pub app_id: String,
    pub sdk_id: String,
    pub secret_id: String,
    pub secret_key: String,
    /// User the API calls are made on behalf of.
    pub operator_id: String,
    pub processing_codes: Vec<i64>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    minutes: Option<Minutes>,
}

#[derive(Debug, Deserialize)]
struct Minutes {
    #[serde(default)]
    paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    #[serde(default)]
    sentences: Vec<Sentence>,
}

#[derive(Debug, Deserialize)]
struct Sentence {
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_info: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
}

/// `X-TC-Signature` for one request.
pub fn sign(
    secret_key: &str,
    method: &str,
    secret_id: &str,
    nonce: &str,
    timestamp: &str,
    uri: &str,
    body: &str,
) -> Result<String, hmac::digest::InvalidLength> {
    let header_string = format!(
        "X-TC-Key={}&X-TC-Nonce={}&X-TC-Timestamp={}",
        secret_id, nonce, timestamp
    );
    let string_to_sign = format!("{}\n{}\n{}\n{}", method, header_string, uri, body);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(hex::encode(mac.finalize().into_bytes())))
}

fn join_paragraphs(minutes: Minutes) -> String {
    minutes
        .paragraphs
        .into_iter()
        .map(|p| {
            p.sentences
                .into_iter()
                .flat_map(|s| s.words.into_iter().map(|w| w.text))
                .collect::<String>()
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn classify_error(status: u16, body: &str, processing_codes: &[i64]) -> RecordingApiError {
    let Ok(ErrorResponse { error_info }) = serde_json::from_str::<ErrorResponse>(body) else {
        return classify_status(status, body);
    };

    let processing = processing_codes.contains(&error_info.error_code)
        || error_info.message.to_ascii_lowercase().contains("processing");

    match status {
        400 if processing => RecordingApiError::StillProcessing {
            code: error_info.error_code,
            message: error_info.message,
        },
        400 => RecordingApiError::BadRequest {
            code: error_info.error_code,
            message: error_info.message,
        },
        _ => classify_status(status, &error_info.message),
    }
}

pub struct TencentClient {
    client: reqwest::Client,
    config: TencentClientConfig,
}

impl TencentClient {
    pub fn new(config: TencentClientConfig) -> Result<Self, RecordingApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        info!("Initialized Tencent Meeting client with base URL: {}", config.base_url);

        Ok(Self { client, config })
    }

    async fn signed_get(&self, uri: &str) -> Result<(u16, String), RecordingApiError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let nonce = rand::thread_rng().gen_range(1..=u32::MAX).to_string();
        let signature = sign(
            &self.config.secret_key,
            "GET",
            &self.config.secret_id,
            &nonce,
            &timestamp,
            uri,
            "",
        )
        .map_err(|e| RecordingApiError::Transport(format!("request signing failed: {}", e)))?;

        let response = self
            .client
            .get(format!("{}{}", self.config.base_url, uri))
            .header("Content-Type", "application/json")
            .header("X-TC-Key", &self.config.secret_id)
            .header("X-TC-Timestamp", &timestamp)
            .header("X-TC-Nonce", &nonce)
            .header("X-TC-Signature", signature)
            .header("AppId", &self.config.app_id)
            .header("SdkId", &self.config.sdk_id)
            .header("X-TC-Registered", "1")
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl TranscriptApi for TencentClient {
    async fn fetch_transcript(&self, request: &TranscriptRequest) -> Result<String, RecordingApiError> {
        let uri = format!(
            "/v1/records/transcripts/details?meeting_id={}&record_file_id={}&operator_id={}&operator_id_type=1",
            request.meeting_id, request.file_id, self.config.operator_id
        );
        debug!(meeting_id = %request.meeting_id, record_file_id = %request.file_id, "Fetching Tencent transcript");

        let (status, body) = self.signed_get(&uri).await?;
        if status != 200 {
            return Err(classify_error(status, &body, &self.config.processing_codes));
        }

        let parsed: TranscriptResponse =
            serde_json::from_str(&body).map_err(|e| RecordingApiError::Unexpected {
                status,
                body: format!("unreadable transcript: {}", e),
            })?;

        let minutes = parsed.minutes.ok_or(RecordingApiError::NotFound)?;
        Ok(join_paragraphs(minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_vector() {
        let signature = sign(
            "secretkey",
            "GET",
            "AKIDtest",
            "12345",
            "1700000000",
            "/v1/records/transcripts/details?meeting_id=m-1&record_file_id=rf-1",
            "",
        )
        .unwrap();
        assert_eq!(
            signature,
            "NmJkODk4MjJkZjBmZTIwNjE0NDFjZjgzZDExMTYwMzUyNTg1YWI0NzQ4YWFmYTAxNDIzOWYzZjIxNWE0ZTA4MA=="
        );
    }

    #[test]
    fn test_transcript_paragraphs_joined() {
        let body = r#"{"minutes":{"paragraphs":[
            {"pid":"1","sentences":[{"words":[{"text":"Hello "},{"text":"team."}]}]},
            {"pid":"2","sentences":[{"words":[{"text":"Next"}]},{"words":[{"text":" item."}]}]},
            {"pid":"3","sentences":[]}
        ]},"more":false}"#;
        let parsed: TranscriptResponse = serde_json::from_str(body).unwrap();
        assert_eq!(join_paragraphs(parsed.minutes.unwrap()), "Hello team.\nNext item.");
    }

    #[test]
    fn test_error_classification() {
        let body = r#"{"error_info":{"error_code":500125,"message":"transcript is processing"}}"#;
        assert!(matches!(
            classify_error(400, body, &[]),
            RecordingApiError::StillProcessing { code: 500125, .. }
        ));

        let body = r#"{"error_info":{"error_code":9002,"message":"meeting not exist"}}"#;
        assert!(matches!(
            classify_error(400, body, &[]),
            RecordingApiError::BadRequest { code: 9002, .. }
        ));
        assert_eq!(classify_error(401, body, &[]), RecordingApiError::Unauthorized);
        assert!(classify_error(500, "<html>", &[]).is_transient());
    }
}
