//! Aggregator Binary Entry Point
//!
//! This binary runs the ingestion server, worker pool and dedup store.
//! Core functionality is provided by the `aggregator` library crate.

use std::net::SocketAddr;
use std::sync::Arc;

use aggregator::{
    PipelineBuilder, StorageBuilder,
    config::AppConfig,
    server::{AppState, create_router},
};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Aggregator - Deduplicating Event Ingestion
#[derive(Parser, Debug)]
#[command(name = "aggregator", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "AGGREGATOR_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "AGGREGATOR_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "AGGREGATOR_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database file path (overrides config file)
    #[arg(long, env = "AGGREGATOR_DB_PATH")]
    db_path: Option<String>,

    /// Number of workers (overrides config file)
    #[arg(long, env = "AGGREGATOR_WORKERS")]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aggregator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Aggregator - Deduplicating Event Ingestion");

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let mut config = AppConfig::load_or_default(&cli.config)?;

    // CLI > ENV > config file
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(workers) = cli.workers {
        config.pipeline.workers = workers;
    }
    config.validate()?;

    tracing::info!(
        bind = %config.server.bind,
        port = config.server.port,
        db = %config.database.path,
        workers = config.pipeline.workers,
        queue_capacity = config.pipeline.queue_capacity,
        "Configuration loaded"
    );

    // Build storage layer
    let db_url = config.database.connection_url();
    tracing::info!(url = %db_url, "Initializing storage");

    let store = StorageBuilder::new(&db_url)
        .max_connections(config.database.max_connections)
        .busy_timeout(config.database.busy_timeout)
        .build()
        .await?;

    tracing::info!("Storage initialized");

    // Start the worker pool
    let pipeline = PipelineBuilder::new(Arc::new(store.clone()))
        .queue_capacity(config.pipeline.queue_capacity)
        .workers(config.pipeline.workers)
        .dequeue_timeout(config.pipeline.dequeue_timeout)
        .drain_on_shutdown(config.pipeline.drain_on_shutdown)
        .shutdown_timeout(config.pipeline.shutdown_timeout)
        .build();
    tracing::info!(workers = pipeline.worker_count(), "Pipeline started");

    let app = create_router(AppState::from_pipeline(&pipeline));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down workers...");
    match pipeline.shutdown().await {
        Ok(report) if report.abandoned > 0 => {
            tracing::warn!(abandoned = report.abandoned, "Queued events were not processed");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Failed to shutdown workers"),
    }

    tracing::info!("Shutting down storage...");
    store.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
