//! Composition root: wires config, storage, queue, provider clients, the
//! worker pool and the HTTP server.

use crate::api::{ApiServer, AppState};
use crate::config::Config;
use crate::crypto::{LarkCipher, TencentCodec};
use crate::db::{self, SqliteMeetingStore};
use crate::pipeline::{
    Ingestor, LarkApis, LarkIngest, PipelineContext, PipelineProcessor, PipelineSettings,
    TencentIngest,
};
use crate::queue::{InflightRegistry, JobQueue, WorkerPool, WorkerPoolOptions};
use crate::recording::lark_client::LarkClientConfig;
use crate::recording::tencent_client::TencentClientConfig;
use crate::recording::{LarkClient, TencentClient, TranscriptApi};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run_service() -> Result<()> {
    info!("Starting minutehook service");

    let config = Config::load()?;

    let db_path = config.database.resolve_path()?;
    let conn = db::init_db(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let conn = db::shared(conn);
    info!("Using database at {:?}", db_path);

    let queue = JobQueue::new(conn.clone()).with_retention(config.queue.retention());
    queue
        .requeue_stale(Duration::from_secs(config.queue.stale_after_secs))
        .await
        .context("Failed to recover jobs from a previous run")?;

    let ctx = PipelineContext {
        store: Arc::new(SqliteMeetingStore::new(conn.clone())),
        queue: queue.clone(),
        inflight: InflightRegistry::new(
            conn.clone(),
            Duration::from_secs(config.queue.inflight_ttl_secs),
        ),
        settings: PipelineSettings {
            transcript_delay: Duration::from_secs(config.poller.transcript_delay_secs),
            poll_max_attempts: config.poller.max_attempts,
            poll_interval: Duration::from_secs(config.poller.interval_secs),
        },
        tencent_transcripts: build_tencent_api(&config)?,
        lark: build_lark_apis(&config)?,
    };

    let ingestor = Ingestor::new(
        build_tencent_ingest(&config)?,
        build_lark_ingest(&config),
        queue.clone(),
    );

    let shutdown = CancellationToken::new();

    let processor = Arc::new(PipelineProcessor::new(ctx));
    let workers = WorkerPool::new(
        queue.clone(),
        processor,
        WorkerPoolOptions {
            workers: config.queue.workers,
            poll_interval: config.queue.poll_interval(),
            prune_interval: Duration::from_secs(config.queue.prune_interval_secs),
            stale_after: Duration::from_secs(config.queue.stale_after_secs),
        },
    )
    .spawn(shutdown.clone());

    let server = ApiServer::new(
        config.server.bind.clone(),
        AppState {
            ingestor: Arc::new(ingestor),
            queue,
        },
    );
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.start(server_shutdown.clone()).await {
            error!("API server failed: {:#}", e);
            server_shutdown.cancel();
        }
    });

    info!("minutehook is ready!");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let _ = server_handle.await;
    for handle in workers {
        let _ = handle.await;
    }

    info!("minutehook stopped");
    Ok(())
}

fn build_tencent_ingest(config: &Config) -> Result<Option<TencentIngest>> {
    if !config.tencent.callbacks_enabled() {
        warn!("Tencent callback token or encoding key not set, Tencent webhooks disabled");
        return Ok(None);
    }
    let codec = TencentCodec::from_encoding_key(&config.tencent.encoding_aes_key)
        .context("Invalid Tencent encoding_aes_key")?;
    Ok(Some(TencentIngest {
        token: config.tencent.token.clone(),
        codec,
    }))
}

fn build_lark_ingest(config: &Config) -> Option<LarkIngest> {
    if !config.lark.callbacks_enabled() {
        warn!("Lark encrypt key and verification token not set, Lark webhooks disabled");
        return None;
    }
    let lark = &config.lark;
    Some(LarkIngest {
        cipher: (!lark.encrypt_key.is_empty()).then(|| LarkCipher::new(&lark.encrypt_key)),
        verification_token: (!lark.verification_token.is_empty())
            .then(|| lark.verification_token.clone()),
    })
}

fn build_tencent_api(config: &Config) -> Result<Option<Arc<dyn TranscriptApi>>> {
    let tencent = &config.tencent;
    if !tencent.api_enabled() {
        info!("Tencent API credentials not set, transcripts will not be fetched");
        return Ok(None);
    }
    let client = TencentClient::new(TencentClientConfig {
        base_url: tencent.api_base_url.clone(),
        app_id: tencent.app_id.clone(),
        sdk_id: tencent.sdk_id.clone(),
        secret_id: tencent.secret_id.clone(),
        secret_key: tencent.secret_key.clone(),
        operator_id: tencent.operator_id.clone(),
        processing_codes: tencent.processing_codes.clone(),
        timeout: Duration::from_secs(tencent.timeout_secs),
    })
    .context("Failed to build Tencent Meeting client")?;
    Ok(Some(Arc::new(client)))
}

fn build_lark_apis(config: &Config) -> Result<Option<LarkApis>> {
    let lark = &config.lark;
    if !lark.api_enabled() {
        info!("Lark app credentials not set, Lark recordings will not be resolved");
        return Ok(None);
    }
    let client = Arc::new(
        LarkClient::new(LarkClientConfig {
            base_url: lark.base_url.clone(),
            app_id: lark.app_id.clone(),
            app_secret: lark.app_secret.clone(),
            processing_codes: lark.processing_codes.clone(),
            timeout: Duration::from_secs(lark.timeout_secs),
        })
        .context("Failed to build Lark client")?,
    );
    Ok(Some(LarkApis {
        recordings: client.clone(),
        transcripts: client,
    }))
}
