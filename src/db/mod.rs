use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::job::Job;
use crate::models::status::ScanStatus;

pub mod memory;
pub mod queries;

pub use memory::InMemoryJobStore;
pub use queries::PgJobStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persisted job records, one per scan.
///
/// Every mutation is a single-field or whole-record write; nothing spans
/// more than one job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write a fresh job, replacing any earlier job for the same scan.
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Overwrite an existing job record.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, scan_id: &str) -> Result<Option<Job>, StoreError>;

    /// Highest queue position ever assigned, if any.
    async fn max_queue_position(&self) -> Result<Option<i64>, StoreError>;

    /// The queued job that dispatches next (see [`Job::dispatch_order`]).
    async fn next_queued(&self) -> Result<Option<Job>, StoreError>;

    async fn list_by_status(&self, statuses: &[ScanStatus]) -> Result<Vec<Job>, StoreError>;

    async fn count_by_status(&self, status: ScanStatus) -> Result<i64, StoreError>;

    /// Single-field write used when a queue operation could not persist.
    /// Returns `false` when the scan has no record to mark.
    async fn mark_queue_failed(&self, scan_id: &str, message: &str) -> Result<bool, StoreError>;

    /// Connectivity check for health endpoints.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record for scan {scan_id}: {reason}")]
    Decode { scan_id: String, reason: String },

    #[error("No job record for scan {0}")]
    NotFound(String),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}
