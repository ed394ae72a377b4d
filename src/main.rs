use axum::routing::get;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scan_analysis_queue::{
    app_state::AppState,
    config::AppConfig,
    db::{self, JobStore, PgJobStore},
    routes,
    services::{inference::InferenceClient, scheduler::QueueScheduler, storage::R2ImageStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing scan analysis server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));
    let state = AppState::new(Arc::clone(&store));
    let shutdown = CancellationToken::new();

    let scheduler_task = if config.embedded_scheduler {
        tracing::info!("Initializing R2 image store");
        let images = R2ImageStore::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )
        .expect("Failed to initialize R2 client");

        tracing::info!(base_url = %config.inference_base_url, "Initializing inference client");
        let inference =
            InferenceClient::new(&config.inference_base_url, config.inference_api_token.clone());

        let scheduler = Arc::new(QueueScheduler::new(
            Arc::clone(&store),
            Arc::new(images),
            Arc::new(inference),
            config.scheduler(),
        ));
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        tracing::info!("Embedded scheduler disabled; expecting a separate worker");
        None
    };

    let app = routes::app(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}
