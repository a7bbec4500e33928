//! Glucosync Server - Main entry point

use anyhow::Result;
use glucosync_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use glucosync_server::{
    api::{self, AppState},
    config::Config,
    ingest::{
        AdapterRegistry, ImportPipeline, ImportPipelineConfig, SyncEngine, SyncScheduler,
        SyncServiceRegistry, TargetLocks,
    },
    notify::SqliteNotifier,
    settings::{FileSettings, SettingsProvider},
    store::{self, SqliteStreamStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("glucosync-server".to_string())
        .filter_directives("glucosync_server=debug,tower_http=debug,sqlx=warn".to_string())
        .build();

    // LOG_* environment variables take precedence
    let log_config = log_config.merge_env()?;

    init_logging(&log_config)?;

    info!("Starting Glucosync Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = store::sqlite::connect(&config.database.url, config.database.max_connections)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    info!("Database ready, migrations applied");

    tokio::fs::create_dir_all(&config.import.upload_dir).await?;

    let stream_store = Arc::new(SqliteStreamStore::new(db_pool.clone()));
    let notifier = SqliteNotifier::new(db_pool.clone());
    let settings: Arc<dyn SettingsProvider> = Arc::new(FileSettings::new(
        &config.sync.settings_path,
        config.sync.default_interval(),
    ));

    let target_locks = TargetLocks::new();

    let pipeline = ImportPipeline::new(
        stream_store.clone(),
        Arc::new(notifier.clone()),
        AdapterRegistry::with_defaults(config.import.batch_size),
        ImportPipelineConfig {
            max_workers: config.import.max_workers,
        },
        target_locks.clone(),
    );

    let engine = SyncEngine::new(
        stream_store,
        Arc::new(notifier.clone()),
        settings.clone(),
        SyncServiceRegistry::with_defaults(config.sync.nightscout()),
        target_locks,
    );

    let _scheduler_handle = if config.sync.enabled {
        info!(settings = %config.sync.settings_path.display(), "Sync is enabled, starting scheduler");
        Some(SyncScheduler::new(engine.clone(), settings, config.sync.warmup()).start())
    } else {
        info!("Sync is disabled (GLUCOSYNC_SYNC_ENABLED=false)");
        None
    };

    let state = AppState {
        db: db_pool,
        pipeline: pipeline.clone(),
        engine,
        notifications: notifier,
        upload_dir: config.import.upload_dir.clone(),
    };

    let app = api::create_router(state, config.import.max_upload_bytes);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Imports commit batch by batch, so abandoning one on timeout is safe.
    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, pipeline.wait_idle()).await.is_err() {
        info!("Import still running after {:?}, exiting anyway", timeout);
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
