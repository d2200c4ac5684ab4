//! Lark Open Platform client: tenant token, meeting recordings and minutes
//! transcripts.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    classify_status, RecordingApi, RecordingApiError, RecordingInfo, TranscriptApi,
    TranscriptRequest,
};

/// Refresh the tenant token this long before it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct LarkClientConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,
    /// Business codes meaning "recording not ready yet".
    pub processing_codes: Vec<i64>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct LarkResponse<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    /// Seconds.
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct RecordingData {
    recording: Option<RecordingBody>,
}

#[derive(Debug, Deserialize)]
struct RecordingBody {
    url: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct LarkClient {
    client: reqwest::Client,
    config: LarkClientConfig,
    token: Mutex<Option<CachedToken>>,
}

/// Classify a Lark error from its HTTP status and business code.
pub fn classify_error(status: u16, code: i64, msg: &str, processing_codes: &[i64]) -> RecordingApiError {
    let processing =
        processing_codes.contains(&code) || msg.to_ascii_lowercase().contains("processing");

    match status {
        400 | 200 if processing => RecordingApiError::StillProcessing {
            code,
            message: msg.to_string(),
        },
        400 | 200 => RecordingApiError::BadRequest {
            code,
            message: msg.to_string(),
        },
        _ => classify_status(status, msg),
    }
}

impl LarkClient {
    pub fn new(config: LarkClientConfig) -> Result<Self, RecordingApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        info!("Initialized Lark client with base URL: {}", config.base_url);

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    async fn tenant_token(&self) -> Result<String, RecordingApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.config.base_url
        );
        debug!("Requesting Lark tenant access token");

        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                app_id: &self.config.app_id,
                app_secret: &self.config.app_secret,
            })
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if status != 200 {
            return Err(classify_status(status, &body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            RecordingApiError::Unexpected {
                status,
                body: format!("unreadable token response: {}", e),
            }
        })?;

        let value = match (parsed.code, parsed.tenant_access_token) {
            (0, Some(value)) => value,
            (code, _) => {
                warn!(code, msg = %parsed.msg, "Lark rejected app credentials");
                return Err(RecordingApiError::Unauthorized);
            }
        };

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(parsed.expire),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// GET with the tenant token, refreshing it once if the provider rejects it.
    async fn get(&self, url: &str) -> Result<(u16, String), RecordingApiError> {
        for attempt in 0..2 {
            let token = self.tenant_token().await?;
            let response = self.client.get(url).bearer_auth(&token).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;

            if status == 401 && attempt == 0 {
                debug!("Lark token rejected, refreshing");
                self.invalidate_token().await;
                continue;
            }
            return Ok((status, body));
        }
        Err(RecordingApiError::Unauthorized)
    }

    fn parse_envelope<T: DeserializeOwned>(
        &self,
        status: u16,
        body: &str,
    ) -> Result<Option<T>, RecordingApiError> {
        match serde_json::from_str::<LarkResponse<T>>(body) {
            Ok(envelope) if status == 200 && envelope.code == 0 => Ok(envelope.data),
            Ok(envelope) => Err(classify_error(
                status,
                envelope.code,
                &envelope.msg,
                &self.config.processing_codes,
            )),
            Err(_) => Err(classify_status(status, body)),
        }
    }
}

#[async_trait]
impl RecordingApi for LarkClient {
    async fn get_recording(&self, meeting_id: &str) -> Result<RecordingInfo, RecordingApiError> {
        let url = format!(
            "{}/open-apis/vc/v1/meetings/{}/recording",
            self.config.base_url, meeting_id
        );
        let (status, body) = self.get(&url).await?;
        let data: Option<RecordingData> = self.parse_envelope(status, &body)?;

        Ok(RecordingInfo {
            url: data.and_then(|d| d.recording).and_then(|r| r.url),
        })
    }
}

#[async_trait]
impl TranscriptApi for LarkClient {
    async fn fetch_transcript(&self, request: &TranscriptRequest) -> Result<String, RecordingApiError> {
        let url = format!(
            "{}/open-apis/minutes/v1/minutes/{}/transcript?need_speaker=true&need_timestamp=false&file_format=txt",
            self.config.base_url, request.file_id
        );
        let (status, body) = self.get(&url).await?;

        if status == 200 && !body.trim_start().starts_with('{') {
            return Ok(body);
        }
        // Errors come back as a JSON envelope.
        self.parse_envelope::<serde_json::Value>(status, &body)?;
        Err(RecordingApiError::Unexpected {
            status,
            body: "transcript response carried no text".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODES: &[i64] = &[124002];

    #[test]
    fn test_processing_by_code_or_message() {
        assert!(matches!(
            classify_error(400, 124002, "", CODES),
            RecordingApiError::StillProcessing { code: 124002, .. }
        ));
        assert!(matches!(
            classify_error(400, 1, "Recording is Processing", CODES),
            RecordingApiError::StillProcessing { .. }
        ));
        assert!(matches!(
            classify_error(400, 99991400, "invalid param", CODES),
            RecordingApiError::BadRequest { code: 99991400, .. }
        ));
    }

    #[test]
    fn test_other_statuses() {
        assert_eq!(classify_error(403, 0, "", CODES), RecordingApiError::Unauthorized);
        assert_eq!(classify_error(404, 0, "", CODES), RecordingApiError::NotFound);
        assert!(classify_error(502, 0, "", CODES).is_transient());
    }

    #[test]
    fn test_envelope_parsing() {
        let client = LarkClient::new(LarkClientConfig {
            base_url: "http://localhost".to_string(),
            app_id: "cli".to_string(),
            app_secret: "secret".to_string(),
            processing_codes: CODES.to_vec(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        let data: Option<RecordingData> = client
            .parse_envelope(
                200,
                r#"{"code":0,"msg":"success","data":{"recording":{"url":"https://x/minutes/abc","duration":"30000"}}}"#,
            )
            .unwrap();
        assert_eq!(
            data.unwrap().recording.unwrap().url.as_deref(),
            Some("https://x/minutes/abc")
        );

        let err = client
            .parse_envelope::<RecordingData>(400, r#"{"code":124002,"msg":"recording not ready"}"#)
            .unwrap_err();
        assert!(matches!(err, RecordingApiError::StillProcessing { .. }));
    }
}
