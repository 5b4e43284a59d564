//! AI moderation worker binary.
//!
//! Pass `--once` to run a single tick and exit.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use memalerts_db::{PgAdvisoryLock, PgModerationStore};
use memalerts_media::{check_ffmpeg, check_ffprobe, FfmpegToolkit};
use memalerts_ml_client::{AnalysisBackend, MlClient};
use memalerts_storage::MediaStore;
use memalerts_worker::{metrics, Scheduler, WorkerConfig, WorkerDeps};

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("memalerts=info".parse()?)
        .add_directive("sqlx=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    let once = std::env::args().skip(1).any(|a| a == "--once");
    info!("Starting memalerts-worker");

    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);

    if !config.enabled && !once {
        info!("AI moderation disabled (AI_MODERATION_ENABLED=false), exiting");
        return Ok(());
    }

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!("Metrics exporter listening on {}", addr);
    }

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = memalerts_db::connect(&database_url, config.database_max_connections).await?;
    if config.run_migrations {
        memalerts_db::run_migrations(&pool).await?;
        info!("Database migrations applied");
    }

    if let Err(e) = check_ffmpeg().and_then(|_| check_ffprobe()) {
        warn!("Media tools unavailable, submissions will fail until installed: {}", e);
    }

    let backend: Option<Arc<dyn AnalysisBackend>> = match MlClient::from_env()? {
        Some(client) => {
            match client.health_check().await {
                Ok(true) => info!("Analysis backend is healthy"),
                Ok(false) | Err(_) => warn!("Analysis backend health check failed"),
            }
            Some(Arc::new(client))
        }
        None => {
            warn!("ML_SERVICE_URL not set, moderation runs on keyword heuristics only");
            None
        }
    };

    let content = MediaStore::from_env(config.item_timeout).await?;
    info!(
        root = %content.local().root().display(),
        prefix = content.local().public_prefix(),
        "Local media store ready"
    );

    let deps = WorkerDeps {
        store: Arc::new(PgModerationStore::new(pool.clone())),
        content: Arc::new(content),
        media: Arc::new(FfmpegToolkit::default()),
        backend,
        lock: Arc::new(PgAdvisoryLock::for_instance(pool, &config.instance_id)),
    };
    let scheduler = Arc::new(Scheduler::new(&config, deps)?);

    if once {
        let report = scheduler.run_once().await?;
        info!("Single tick finished: {}", serde_json::to_string(&report)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    shutdown_signal().await;
    info!("Received shutdown signal");
    shutdown_tx.send(true).ok();

    match tokio::time::timeout(config.shutdown_timeout, runner).await {
        Ok(Ok(())) => info!("Worker shutdown complete"),
        Ok(Err(e)) => error!("Scheduler task failed: {}", e),
        Err(_) => warn!(
            "Shutdown timed out after {:?}, abandoning in-flight work",
            config.shutdown_timeout
        ),
    }

    Ok(())
}
