//! Dead-letter inspection and manual retry.

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::queue::Job;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, Default)]
pub struct DeadQueryParams {
    /// Maximum results (default 50)
    pub limit: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(job_counts))
        .route("/dead", get(list_dead))
        .route("/:id/retry", post(retry_job))
        .with_state(state)
}

/// GET /jobs - Job counts by status.
async fn job_counts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let counts: serde_json::Map<String, Value> = state
        .queue
        .count_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| (status, json!(count)))
        .collect();
    Ok(Json(Value::Object(counts)))
}

/// GET /jobs/dead - Jobs that exhausted their attempts or failed fatally.
async fn list_dead(
    State(state): State<AppState>,
    Query(params): Query<DeadQueryParams>,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = state.queue.list_dead(params.limit.unwrap_or(50)).await?;
    Ok(Json(jobs))
}

/// POST /jobs/:id/retry - Move a dead job back to the queue.
async fn retry_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    if !state.queue.retry_dead(id).await? {
        return Err(ApiError::not_found(format!("Dead job {} not found", id)));
    }
    Ok(Json(json!({ "id": id, "status": "queued" })))
}
