use scan_analysis_queue::{
    config::AppConfig,
    db::{self, JobStore, PgJobStore},
    models::{
        job::{NewJob, Priority},
        status::ScanStatus,
    },
    services::{
        queue::JobQueue,
        storage::{ImageSource, R2ImageStore},
    },
};
use uuid::Uuid;

/// Integration test: job store and queue against PostgreSQL
///
/// Verifies:
/// 1. Database connection and schema
/// 2. Enqueue assigns increasing queue positions
/// 3. Dispatch order (priority, then position)
/// 4. Status updates and queue_failed marking
///
/// Note: This requires a running PostgreSQL instance configured via
/// DATABASE_URL (plus the other required settings).
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_job_store_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let store = PgJobStore::new(db_pool.clone());
    store.ping().await.expect("Database ping failed");

    let queue = JobQueue::new(std::sync::Arc::new(PgJobStore::new(db_pool.clone())));

    let low = format!("it-low-{}", Uuid::new_v4());
    let urgent = format!("it-urgent-{}", Uuid::new_v4());

    // 1. Enqueue two scans
    assert!(queue.enqueue(NewJob::new(&low, "brain_tumor", Priority::Low)).await);
    assert!(
        queue
            .enqueue(NewJob::new(&urgent, "CT", Priority::Urgent).with_body_region("chest"))
            .await
    );

    let low_job = store.get(&low).await.expect("Failed to get job").expect("Job not found");
    let urgent_job = store
        .get(&urgent)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(low_job.status, ScanStatus::Queued);
    assert_eq!(urgent_job.body_region.as_deref(), Some("chest"));
    assert!(urgent_job.queue_position > low_job.queue_position);

    // 2. Urgent dispatches first
    let next = store
        .next_queued()
        .await
        .expect("Failed to select next job")
        .expect("Queue is empty");
    assert_eq!(next.priority_level(), 4);

    // 3. Status update round-trip
    let mut running = urgent_job.clone();
    running
        .transition_to(ScanStatus::QueueProcessing)
        .expect("Invalid transition");
    store.update(&running).await.expect("Failed to update job");

    let reloaded = store.get(&urgent).await.unwrap().unwrap();
    assert_eq!(reloaded.status, ScanStatus::QueueProcessing);
    assert!(reloaded.processing_start_time.is_some());

    let in_flight = store
        .list_by_status(&[ScanStatus::QueueProcessing])
        .await
        .expect("Failed to list jobs");
    assert!(in_flight.iter().any(|j| j.scan_id == urgent));

    // 4. queue_failed marking
    store
        .mark_queue_failed(&low, "database write timed out")
        .await
        .expect("Failed to mark queue_failed");

    let failed = store.get(&low).await.unwrap().unwrap();
    assert_eq!(failed.status, ScanStatus::QueueFailed);
    assert_eq!(
        failed.last_error_message.as_deref(),
        Some("database write timed out")
    );

    // Cleanup
    sqlx::query("DELETE FROM scan_jobs WHERE scan_id = ANY($1)")
        .bind(vec![low, urgent])
        .execute(&db_pool)
        .await
        .expect("Failed to clean up");

    println!("✅ Job store integration passed!");
}

/// Integration test: scan image upload and fetch on R2
#[tokio::test]
#[ignore] // Requires R2 credentials
async fn test_image_store_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let images = R2ImageStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2");

    let scan_id = format!("it-{}", Uuid::new_v4());
    let payload = b"fake scan pixels for testing";

    images
        .upload(&scan_id, 0, payload, "application/octet-stream")
        .await
        .expect("R2 upload failed");

    let fetched = images.fetch(&scan_id, 0).await.expect("R2 fetch failed");
    assert_eq!(fetched.as_deref(), Some(payload.as_slice()));

    let missing = images.fetch(&scan_id, 1).await.expect("R2 fetch failed");
    assert!(missing.is_none());

    images
        .delete(&scan_id, 0)
        .await
        .expect("Failed to delete test image");
}
