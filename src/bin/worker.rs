use scan_analysis_queue::{
    config::AppConfig,
    db::{self, PgJobStore},
    services::{inference::InferenceClient, scheduler::QueueScheduler, storage::R2ImageStore},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting scan analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    tracing::info!(
        "Dispatching from this worker; run the API server with EMBEDDED_SCHEDULER=false so jobs are not dispatched twice"
    );

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let images = R2ImageStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let inference = InferenceClient::new(&config.inference_base_url, config.inference_api_token.clone());

    let scheduler = Arc::new(QueueScheduler::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(images),
        Arc::new(inference),
        config.scheduler(),
    ));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, finishing in-flight job");
        signal.cancel();
    });

    tracing::info!("Worker ready, starting dispatch loop");
    scheduler.run(shutdown).await;
}
