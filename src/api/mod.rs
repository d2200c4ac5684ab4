//! HTTP surface of minutehook.
//!
//! Provides endpoints for:
//! - Provider webhooks (Tencent Meeting, Lark)
//! - Dead-letter inspection and retry
//! - Health checks

pub mod error;
pub mod routes;

use crate::pipeline::Ingestor;
use crate::queue::JobQueue;
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub queue: JobQueue,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .nest("/webhooks", routes::webhooks::router(state.clone()))
        .nest("/jobs", routes::jobs::router(state))
        .layer(ServiceBuilder::new())
}

pub struct ApiServer {
    bind: String,
    state: AppState,
}

impl ApiServer {
    pub fn new(bind: impl Into<String>, state: AppState) -> Self {
        Self {
            bind: bind.into(),
            state,
        }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind))?;

        info!("API server listening on http://{}", self.bind);
        info!("Endpoints:");
        info!("  GET  /                  - Service info");
        info!("  GET  /health            - Health check");
        info!("  GET  /webhooks/tencent  - Tencent URL verification");
        info!("  POST /webhooks/tencent  - Tencent event callback");
        info!("  POST /webhooks/lark     - Lark event callback");
        info!("  GET  /jobs              - Job counts by status");
        info!("  GET  /jobs/dead         - List dead jobs");
        info!("  POST /jobs/:id/retry    - Requeue a dead job");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("API server failed")?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "minutehook",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
