//! Medbatch Server - Main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use medbatch_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use medbatch_server::{
    config::Config,
    features,
    pipeline::{Activities, PipelineRunner},
    scheduler::Scheduler,
    storage::{config::StorageConfig, Storage},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; environment variables override individual fields
    let log_config = LogConfig::builder()
        .log_file_prefix("medbatch-server".to_string())
        .filter_directives("medbatch_server=debug,tower_http=debug,axum=trace,sqlx=info".to_string())
        .build()
        .merged_from_env()?;

    init_logging(&log_config)?;

    info!("Starting Medbatch Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Initialize S3/MinIO storage
    let storage_config = StorageConfig::from_env()?;
    let storage = Storage::new(storage_config).await?;
    info!("Storage client initialized");

    // Wire the pipeline onto the scheduler and resume any execution that was
    // in flight when the previous process died.
    let activities = Activities::new(
        db_pool.clone(),
        storage,
        config.pipeline.staging_dir.clone(),
    );
    let scheduler = Scheduler::new(
        db_pool.clone(),
        config.pipeline.queue.clone(),
        config.pipeline.worker_concurrency,
        Arc::new(PipelineRunner::new(activities)),
    );
    let resumed = scheduler.resume_incomplete().await?;
    info!(resumed, "Scheduler started");

    // Build the application router
    let app = create_router(db_pool, scheduler.clone());

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    // Let in-flight pipeline executions finish; interrupted ones are resumed
    // on the next boot.
    scheduler.shutdown().await;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(db: sqlx::PgPool, scheduler: Scheduler) -> Router {
    let feature_state = features::FeatureState {
        db: db.clone(),
        scheduler,
    };

    Router::new()
        .route("/health", get(health_check))
        .with_state(db)
        .nest("/api/v1", features::router(feature_state))
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_check(State(db): State<sqlx::PgPool>) -> Result<Response, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(&db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
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
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
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

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
