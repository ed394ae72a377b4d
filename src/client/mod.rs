//! Client side of the analysis API: trigger an analysis, follow it to a
//! terminal state and keep recent results around.

pub mod api;
pub mod cache;
pub mod poller;
pub mod progress;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::models::analysis::{AnalysisResult, AnalysisType};
use crate::models::api::{AnalyzeRequest, ResponseStatus};
use crate::models::job::Priority;

pub use api::{AnalysisApi, AnalysisEndpoint};
pub use cache::ResultCache;
pub use poller::{PollTarget, PollerConfig, StatusPoller};
pub use progress::{ProgressStage, ProgressState, ProgressTracker};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Analysis API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analysis API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode analysis API response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Analysis request rejected: {0}")]
    Rejected(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Analysis did not finish after {attempts} status checks")]
    PollTimeout { attempts: u32 },

    #[error("Analysis cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// One analysis the caller wants run.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub scan_id: String,
    pub image_index: u32,
    pub analysis_type: AnalysisType,
    pub force: bool,
    pub priority: Option<Priority>,
    pub body_region: Option<String>,
}

impl AnalysisJob {
    pub fn new(scan_id: impl Into<String>, image_index: u32, analysis_type: AnalysisType) -> Self {
        Self {
            scan_id: scan_id.into(),
            image_index,
            analysis_type,
            force: false,
            priority: None,
            body_region: None,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_body_region(mut self, region: impl Into<String>) -> Self {
        self.body_region = Some(region.into());
        self
    }

    fn request(&self) -> AnalyzeRequest {
        AnalyzeRequest {
            analysis_type: self.analysis_type,
            image_index: self.image_index,
            force: self.force,
            priority: self.priority,
            body_region: self.body_region.clone(),
        }
    }

    fn target(&self) -> PollTarget {
        PollTarget {
            scan_id: self.scan_id.clone(),
            image_index: self.image_index,
            analysis_type: self.analysis_type,
        }
    }
}

/// Drives one analysis at a time from trigger to result.
///
/// Progress is published on a watch channel while a run is in flight and
/// cleared when it ends. Starting a new run cancels the previous one.
pub struct AnalysisSession {
    endpoint: Arc<dyn AnalysisEndpoint>,
    cache: Arc<Mutex<ResultCache>>,
    poller: StatusPoller,
    tracker: ProgressTracker,
    progress: watch::Sender<Option<ProgressState>>,
    in_flight: StdMutex<Option<(u64, CancellationToken)>>,
    runs: AtomicU64,
    last_error: StdMutex<Option<String>>,
}

impl AnalysisSession {
    pub fn new(endpoint: Arc<dyn AnalysisEndpoint>, config: PollerConfig) -> Self {
        let cache = Arc::new(Mutex::new(ResultCache::new()));
        let (progress, _) = watch::channel(None);
        Self {
            poller: StatusPoller::new(Arc::clone(&endpoint), Arc::clone(&cache), config),
            endpoint,
            cache,
            tracker: ProgressTracker::default(),
            progress,
            in_flight: StdMutex::new(None),
            runs: AtomicU64::new(0),
            last_error: StdMutex::new(None),
        }
    }

    pub fn cache(&self) -> Arc<Mutex<ResultCache>> {
        Arc::clone(&self.cache)
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressState>> {
        self.progress.subscribe()
    }

    /// Message of the last run that failed for a reason other than
    /// cancellation. Cleared when a new run starts.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Cancel the in-flight run, if any. Cancellation is not an error and
    /// does not touch `last_error`.
    pub fn cancel(&self) {
        if let Some((_, token)) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    /// Run an analysis and wait for its result.
    ///
    /// Without `force`, a fresh cached result for the same image and
    /// analysis type is returned without contacting the server.
    pub async fn analyze(&self, job: AnalysisJob) -> Result<AnalysisResult, ClientError> {
        if !job.force {
            let cached = self
                .cache
                .lock()
                .await
                .get_for(&job.scan_id, job.image_index, job.analysis_type)
                .cloned();
            if let Some(hit) = cached {
                tracing::debug!(scan_id = %job.scan_id, image_index = job.image_index, "Using cached analysis");
                return Ok(hit);
            }
        }

        let token = CancellationToken::new();
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((run, token.clone()))
        {
            previous.cancel();
        }
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let progress_cancel = token.child_token();
        let outcome = {
            let work = self.submit_and_poll(&job, &token);
            tokio::pin!(work);
            tokio::select! {
                outcome = &mut work => outcome,
                _ = self.tracker.run(&self.progress, &progress_cancel) => work.await,
            }
        };
        progress_cancel.cancel();
        self.progress.send_replace(None);

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // a newer run may already own the slot
            if in_flight.as_ref().is_some_and(|(owner, _)| *owner == run) {
                *in_flight = None;
            }
        }

        if let Err(e) = &outcome {
            if !e.is_cancelled() {
                tracing::warn!(scan_id = %job.scan_id, error = %e, "Analysis run failed");
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
            }
        }
        outcome
    }

    async fn submit_and_poll(
        &self,
        job: &AnalysisJob,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, ClientError> {
        let request = job.request();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = self.endpoint.trigger(&job.scan_id, &request) => response?,
        };

        if response.status == ResponseStatus::Error {
            return Err(ClientError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "Analysis request was rejected".to_string()),
            ));
        }

        tracing::info!(
            scan_id = %job.scan_id,
            image_index = job.image_index,
            analysis_type = %job.analysis_type,
            status = ?response.data.as_ref().map(|d| d.status),
            "Analysis triggered"
        );

        self.poller.poll_analysis_results(&job.target(), cancel).await
    }
}
