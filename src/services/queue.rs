use std::sync::Arc;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Job, NewJob};
use crate::models::status::ScanStatus;

/// Entry point for putting scans on the analysis queue.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Queue a scan for analysis.
    ///
    /// Returns `false` when the job could not be persisted. In that case an
    /// existing record for the scan is marked `queue_failed` (best effort)
    /// and the error is logged, never returned. A scan queued for the first
    /// time has no record to mark; only the log entry remains.
    pub async fn enqueue(&self, new: NewJob) -> bool {
        let scan_id = new.scan_id.clone();

        match self.try_enqueue(new).await {
            Ok(job) => {
                metrics::counter!("analysis_jobs_enqueued_total").increment(1);
                tracing::info!(
                    scan_id = %job.scan_id,
                    scan_type = %job.scan_type,
                    priority = %job.priority,
                    queue_position = job.queue_position,
                    "Scan queued for analysis"
                );
                true
            }
            Err(e) => {
                tracing::error!(scan_id = %scan_id, error = %e, "Failed to queue scan");
                match self.store.mark_queue_failed(&scan_id, &e.to_string()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(scan_id = %scan_id, "No job record to mark queue_failed")
                    }
                    Err(mark_err) => tracing::error!(
                        scan_id = %scan_id,
                        error = %mark_err,
                        "Failed to record queue_failed status"
                    ),
                }
                false
            }
        }
    }

    async fn try_enqueue(&self, new: NewJob) -> Result<Job, StoreError> {
        let position = self.store.max_queue_position().await?.unwrap_or(0) + 1;
        let job = Job::queued(new, position);
        self.store.insert(&job).await?;
        Ok(job)
    }

    /// Number of jobs waiting for dispatch.
    pub async fn depth(&self) -> Result<i64, StoreError> {
        self.store.count_by_status(ScanStatus::Queued).await
    }
}

/// The job that dispatches next among `jobs`, ignoring anything not queued.
pub fn select_next<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Option<&'a Job> {
    jobs.into_iter()
        .filter(|j| j.status == ScanStatus::Queued)
        .min_by(|a, b| a.dispatch_order(b))
}
