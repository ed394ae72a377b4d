//! Single-worker dispatch loop for queued scan analyses.
//!
//! One tick selects the best queued job and drives it through
//! `queue_processing -> ai_processing[_*] -> report_generating -> terminal`.
//! An in-memory flag keeps at most one tick body running per scheduler; it
//! does not coordinate between processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strum::IntoEnumIterator;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::db::{JobStore, StoreError};
use crate::models::analysis::{AnalysisOutput, AnalysisType, InferenceResult};
use crate::models::job::{Job, MAX_RETRIES};
use crate::models::status::{ScanStatus, TransitionError};
use crate::services::inference::{select_analysis_type, InferenceBackend, InferenceError};
use crate::services::storage::{ImageSource, StorageError};

const INTERRUPTED_MESSAGE: &str = "interrupted by scheduler restart";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period of the dispatch timer.
    pub tick: Duration,
    /// Failed attempts retried before a job is parked as `failed`.
    pub max_retries: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            max_retries: MAX_RETRIES,
        }
    }
}

/// Failure of a single processing attempt. Subject to the retry policy
/// unless [`ProcessingError::is_retryable`] says otherwise.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("image not found")]
    ImageNotFound,

    #[error("Image storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Inference(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Pipeline step failure: either the attempt failed or the record could
/// not be kept in step with it.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// How a dispatched job ended this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { scan_id: String, status: ScanStatus },
    /// Failed and returned to `queued` at its original position.
    Retrying { scan_id: String, retry_count: i32 },
    RetryExhausted { scan_id: String, retry_count: i32, message: String },
    /// Permanent failure that skips the retry policy.
    Rejected { scan_id: String, message: String },
    /// The job record could not be updated.
    QueueFailed { scan_id: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another cycle is still running.
    Busy,
    /// Nothing queued.
    Idle,
    StoreUnavailable(String),
    Processed(JobOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeued,
    Exhausted,
}

/// Record a failed attempt on `job`.
///
/// The job goes back to `queued` while `retry_count <= max_retries` and to
/// `failed` after that. The queue position is left alone, so a retried job
/// keeps its place ahead of later arrivals at the same priority.
pub fn apply_retry_policy(
    job: &mut Job,
    message: &str,
    max_retries: i32,
) -> Result<RetryDecision, TransitionError> {
    let next = if job.retry_count < max_retries {
        ScanStatus::Queued
    } else {
        ScanStatus::Failed
    };
    job.transition_to(next)?;

    job.retry_count += 1;
    job.last_error_message = Some(message.to_string());

    Ok(if next == ScanStatus::Queued {
        RetryDecision::Requeued
    } else {
        RetryDecision::Exhausted
    })
}

/// Terminal success status for a finished pipeline run.
pub fn terminal_status(analysis: AnalysisType, result: &InferenceResult) -> ScanStatus {
    if analysis.is_conversion() {
        ScanStatus::TranslationCompleted
    } else if result.has_findings() {
        ScanStatus::CompletedWithFindings
    } else {
        ScanStatus::CompletedNoFindings
    }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QueueScheduler {
    store: Arc<dyn JobStore>,
    images: Arc<dyn ImageSource>,
    inference: Arc<dyn InferenceBackend>,
    config: SchedulerConfig,
    processing: AtomicBool,
}

impl QueueScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        images: Arc<dyn ImageSource>,
        inference: Arc<dyn InferenceBackend>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            images,
            inference,
            config,
            processing: AtomicBool::new(false),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Run the dispatch timer until `shutdown` fires, then wait for the
    /// in-flight job to finish.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        match self.recover_interrupted().await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Recovered jobs interrupted by a previous run"),
            Err(e) => tracing::error!(error = %e, "Failed to recover interrupted jobs"),
        }

        let tracker = TaskTracker::new();
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(tick_secs = self.config.tick.as_secs_f64(), "Queue scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    tracker.spawn(async move {
                        scheduler.tick().await;
                    });
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("Queue scheduler stopped");
    }

    /// One dispatch cycle. A no-op while another cycle holds the guard.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            tracing::trace!("Dispatch cycle already running, skipping tick");
            return TickOutcome::Busy;
        };

        if let Ok(depth) = self.store.count_by_status(ScanStatus::Queued).await {
            metrics::gauge!("analysis_queue_depth").set(depth as f64);
        }

        match self.store.next_queued().await {
            Ok(Some(job)) => TickOutcome::Processed(self.process_job(job).await),
            Ok(None) => TickOutcome::Idle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select next queued job");
                TickOutcome::StoreUnavailable(e.to_string())
            }
        }
    }

    /// Drive one job to a terminal status or back to the queue. Never
    /// returns an error: failures end up on the job record.
    pub async fn process_job(&self, mut job: Job) -> JobOutcome {
        tracing::info!(
            scan_id = %job.scan_id,
            scan_type = %job.scan_type,
            priority = job.priority_level(),
            retry_count = job.retry_count,
            "Processing scan analysis job"
        );

        let started = Instant::now();
        match self.run_pipeline(&mut job).await {
            Ok((analysis, output)) => self.finish(job, analysis, output, started).await,
            Err(StepError::Processing(e)) => self.fail(job, e).await,
            Err(e) => self.queue_failed(&job.scan_id, &e.to_string()).await,
        }
    }

    async fn run_pipeline(&self, job: &mut Job) -> Result<(AnalysisType, AnalysisOutput), StepError> {
        self.advance(job, ScanStatus::QueueProcessing).await?;

        let selection = select_analysis_type(&job.scan_type, job.body_region.as_deref());
        let inference_status = ScanStatus::inference_status(selection.as_ref().ok().copied());
        self.advance(job, inference_status).await?;

        let analysis = selection.map_err(ProcessingError::from)?;

        tracing::debug!(scan_id = %job.scan_id, image_index = job.image_index, "Fetching scan image");
        let image = self
            .images
            .fetch(&job.scan_id, job.image_index)
            .await
            .map_err(ProcessingError::from)?
            .ok_or(ProcessingError::ImageNotFound)?;

        let call_started = Instant::now();
        let inference = self
            .inference
            .analyze(&image, analysis)
            .await
            .map_err(ProcessingError::from)?;

        tracing::info!(
            scan_id = %job.scan_id,
            analysis = %analysis,
            inference_ms = call_started.elapsed().as_millis() as u64,
            "Inference complete"
        );

        self.advance(job, ScanStatus::ReportGenerating).await?;

        let report = self
            .inference
            .generate_report(analysis, &inference)
            .await
            .map_err(ProcessingError::from)?;

        Ok((
            analysis,
            AnalysisOutput {
                analysis_type: analysis,
                inference,
                report,
            },
        ))
    }

    async fn advance(&self, job: &mut Job, status: ScanStatus) -> Result<(), StepError> {
        job.transition_to(status)?;
        self.store.update(job).await?;
        tracing::debug!(scan_id = %job.scan_id, status = %status, "Job status updated");
        Ok(())
    }

    async fn finish(
        &self,
        mut job: Job,
        analysis: AnalysisType,
        output: AnalysisOutput,
        started: Instant,
    ) -> JobOutcome {
        let status = terminal_status(analysis, &output.inference);
        job.analysis = Some(output);

        if let Err(e) = job.transition_to(status) {
            return self.queue_failed(&job.scan_id, &e.to_string()).await;
        }
        if let Err(e) = self.store.update(&job).await {
            return self.queue_failed(&job.scan_id, &e.to_string()).await;
        }

        metrics::counter!("analysis_jobs_completed_total").increment(1);
        metrics::histogram!("analysis_processing_seconds").record(started.elapsed().as_secs_f64());

        tracing::info!(
            scan_id = %job.scan_id,
            status = %status,
            retry_count = job.retry_count,
            duration_ms = job.processing_duration_ms,
            "Job completed successfully"
        );

        JobOutcome::Completed {
            scan_id: job.scan_id,
            status,
        }
    }

    async fn fail(&self, mut job: Job, error: ProcessingError) -> JobOutcome {
        let message = error.to_string();

        if !error.is_retryable() {
            job.last_error_message = Some(message.clone());
            if let Err(e) = job.transition_to(ScanStatus::Failed) {
                return self.queue_failed(&job.scan_id, &e.to_string()).await;
            }
            if let Err(e) = self.store.update(&job).await {
                return self.queue_failed(&job.scan_id, &e.to_string()).await;
            }

            metrics::counter!("analysis_jobs_failed_total").increment(1);
            tracing::error!(scan_id = %job.scan_id, error = %message, "Job rejected without retry");
            return JobOutcome::Rejected {
                scan_id: job.scan_id,
                message,
            };
        }

        let decision = match apply_retry_policy(&mut job, &message, self.config.max_retries) {
            Ok(decision) => decision,
            Err(e) => return self.queue_failed(&job.scan_id, &e.to_string()).await,
        };
        if let Err(e) = self.store.update(&job).await {
            return self.queue_failed(&job.scan_id, &e.to_string()).await;
        }

        match decision {
            RetryDecision::Requeued => {
                metrics::counter!("analysis_jobs_retried_total").increment(1);
                tracing::warn!(
                    scan_id = %job.scan_id,
                    retry_count = job.retry_count,
                    error = %message,
                    "Job processing failed, re-queued for retry"
                );
                JobOutcome::Retrying {
                    scan_id: job.scan_id,
                    retry_count: job.retry_count,
                }
            }
            RetryDecision::Exhausted => {
                metrics::counter!("analysis_jobs_failed_total").increment(1);
                tracing::error!(
                    scan_id = %job.scan_id,
                    retry_count = job.retry_count,
                    error = %message,
                    "Job failed after max retries"
                );
                JobOutcome::RetryExhausted {
                    scan_id: job.scan_id,
                    retry_count: job.retry_count,
                    message,
                }
            }
        }
    }

    async fn queue_failed(&self, scan_id: &str, message: &str) -> JobOutcome {
        tracing::error!(scan_id = %scan_id, error = %message, "Job record update failed");
        metrics::counter!("analysis_jobs_failed_total").increment(1);

        match self.store.mark_queue_failed(scan_id, message).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(scan_id = %scan_id, "No job record to mark queue_failed"),
            Err(e) => {
                tracing::error!(scan_id = %scan_id, error = %e, "Failed to record queue_failed status")
            }
        }

        JobOutcome::QueueFailed {
            scan_id: scan_id.to_string(),
            message: message.to_string(),
        }
    }

    /// Return jobs left in flight by a previous process to the retry policy.
    /// A job whose record cannot be written is logged and skipped. Returns
    /// how many jobs were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let in_flight: Vec<ScanStatus> = ScanStatus::iter().filter(|s| s.is_in_flight()).collect();

        let stranded = self.store.list_by_status(&in_flight).await?;
        let mut recovered = 0;

        for mut job in stranded {
            let decision = match apply_retry_policy(&mut job, INTERRUPTED_MESSAGE, self.config.max_retries) {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(scan_id = %job.scan_id, error = %e, "Cannot recover interrupted job");
                    continue;
                }
            };
            if let Err(e) = self.store.update(&job).await {
                tracing::error!(scan_id = %job.scan_id, error = %e, "Failed to persist recovered job");
                continue;
            }
            recovered += 1;
            tracing::warn!(
                scan_id = %job.scan_id,
                retry_count = job.retry_count,
                requeued = decision == RetryDecision::Requeued,
                "Recovered interrupted job"
            );
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::{ClassificationResult, ConversionResult, Finding};
    use crate::models::job::{NewJob, Priority};

    fn in_flight_job() -> Job {
        let mut job = Job::queued(NewJob::new("scan-1", "brain_tumor", Priority::Medium), 4);
        job.transition_to(ScanStatus::QueueProcessing).unwrap();
        job.transition_to(ScanStatus::AiProcessingBrain).unwrap();
        job
    }

    fn classification(findings: Vec<Finding>) -> InferenceResult {
        InferenceResult::Classification(ClassificationResult {
            detected_case: "glioma".to_string(),
            overall_confidence: 0.91,
            confidence_scores: Default::default(),
            findings,
        })
    }

    #[test]
    fn retry_policy_requeues_until_budget_spent() {
        let mut job = in_flight_job();

        for attempt in 1..=3 {
            let decision = apply_retry_policy(&mut job, "timeout", 3).unwrap();
            assert_eq!(decision, RetryDecision::Requeued);
            assert_eq!(job.retry_count, attempt);
            assert_eq!(job.status, ScanStatus::Queued);
            assert_eq!(job.queue_position, 4);

            job.transition_to(ScanStatus::QueueProcessing).unwrap();
        }

        let decision = apply_retry_policy(&mut job, "fourth failure", 3).unwrap();
        assert_eq!(decision, RetryDecision::Exhausted);
        assert_eq!(job.retry_count, 4);
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.last_error_message.as_deref(), Some("fourth failure"));
    }

    #[test]
    fn retry_policy_rejects_jobs_not_in_flight() {
        let mut job = Job::queued(NewJob::new("scan-1", "brain_tumor", Priority::Low), 1);
        job.transition_to(ScanStatus::QueueProcessing).unwrap();
        job.transition_to(ScanStatus::Failed).unwrap();

        assert!(apply_retry_policy(&mut job, "late", 3).is_err());
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn terminal_status_derivation() {
        let with = classification(vec![Finding {
            label: "mass".to_string(),
            confidence: Some(0.8),
            location: None,
        }]);
        let without = classification(Vec::new());
        let conversion = InferenceResult::Conversion(ConversionResult {
            input_image: String::new(),
            output_image: String::new(),
            ssim: 0.82,
        });

        assert_eq!(
            terminal_status(AnalysisType::BrainTumor, &with),
            ScanStatus::CompletedWithFindings
        );
        assert_eq!(
            terminal_status(AnalysisType::LungNodule, &without),
            ScanStatus::CompletedNoFindings
        );
        assert_eq!(
            terminal_status(AnalysisType::MriToCt, &conversion),
            ScanStatus::TranslationCompleted
        );
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = ProcessingGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(ProcessingGuard::acquire(&flag).is_none());

        drop(first);
        assert!(ProcessingGuard::acquire(&flag).is_some());
    }

    #[test]
    fn missing_image_is_retryable_unsupported_type_is_not() {
        assert!(ProcessingError::ImageNotFound.is_retryable());
        assert_eq!(ProcessingError::ImageNotFound.to_string(), "image not found");

        let unsupported = ProcessingError::Inference(InferenceError::UnsupportedAnalysisType {
            scan_type: "XR".to_string(),
            body_region: Some("elbow".to_string()),
        });
        assert!(!unsupported.is_retryable());
    }
}
