//! Inbound provider callbacks.
//!
//! - `GET  /webhooks/tencent` URL verification handshake
//! - `POST /webhooks/tencent` event delivery
//! - `POST /webhooks/lark`    challenge or event delivery

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::events::{Provider, WebhookEnvelope};
use crate::pipeline::{IngestOutcome, LarkReply, WebhookError};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Literal body the Tencent platform expects on success.
pub const TENCENT_ACK: &str = "successfully received callback";

#[derive(Debug, Deserialize, Default)]
pub struct VerifyQuery {
    pub check_str: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TencentBody {
    data: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tencent", get(verify_tencent).post(receive_tencent))
        .route("/lark", post(receive_lark))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// GET /webhooks/tencent - Echo the decrypted `check_str`.
async fn verify_tencent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<String> {
    let plaintext = state.ingestor.verify_tencent_url(
        header(&headers, "timestamp"),
        header(&headers, "nonce"),
        header(&headers, "signature"),
        query.check_str.as_deref(),
    )?;
    Ok(plaintext)
}

/// POST /webhooks/tencent - Verify, decrypt and enqueue an event.
async fn receive_tencent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<&'static str> {
    let timestamp = header(&headers, "timestamp").ok_or(WebhookError::MissingParameter("timestamp"))?;
    let nonce = header(&headers, "nonce").ok_or(WebhookError::MissingParameter("nonce"))?;
    let signature = header(&headers, "signature").ok_or(WebhookError::MissingParameter("signature"))?;
    let TencentBody { data } =
        serde_json::from_str(&body).map_err(|_| ApiError::from(WebhookError::MissingParameter("data")))?;

    let envelope = WebhookEnvelope::new(Provider::Tencent, timestamp, nonce, signature, data);
    let trace_id = envelope.trace_id.clone();
    let outcome = state.ingestor.ingest_tencent(envelope).await?;
    debug!(trace_id = %trace_id, outcome = ?outcome, "Tencent callback acknowledged");

    Ok(TENCENT_ACK)
}

/// POST /webhooks/lark - Answer URL verification or enqueue an event.
async fn receive_lark(State(state): State<AppState>, body: String) -> ApiResult<Json<Value>> {
    match state.ingestor.ingest_lark(&body).await? {
        LarkReply::Challenge(challenge) => Ok(Json(json!({ "challenge": challenge }))),
        LarkReply::Accepted(outcome) => {
            if outcome == IngestOutcome::Ignored {
                debug!("Lark event acknowledged without work");
            }
            Ok(Json(json!({ "code": 0 })))
        }
    }
}
