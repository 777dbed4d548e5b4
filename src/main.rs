//! logistics_core - order ledger and outbox service
//!
//! Serves the tenant-scoped ledger and address APIs and drains the
//! transactional outbox in the background.

use std::net::SocketAddr;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logistics_core::api::{self, AppState};
use logistics_core::db;
use logistics_core::outbox::{
    OutboxProcessor, OutboxRepository, OutboxWorker, OutboxWorkerConfig, RetryPolicy,
    TracingPublisher,
};
use logistics_core::Config;

/// Initialize tracing/logging
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "logistics_core=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting logistics_core");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let processor = OutboxProcessor::new(
        OutboxRepository::with_policy(
            pool.clone(),
            RetryPolicy {
                max_retries: config.outbox_max_retries,
            },
        ),
        TracingPublisher,
        config.outbox_batch_size,
    );
    let worker = OutboxWorker::spawn(
        processor,
        OutboxWorkerConfig {
            poll_interval: config.outbox_poll_interval,
            ..OutboxWorkerConfig::default()
        },
    );

    let app = api::build_app(AppState::new(pool.clone(), config.idempotency_lease));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting requests first, then drain the worker, then the pool
    tracing::info!("Server shutting down...");
    let stats = worker.shutdown().await;
    tracing::info!(
        polls = stats.polls,
        published = stats.published,
        dead_lettered = stats.dead_lettered,
        "Outbox worker drained"
    );
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
