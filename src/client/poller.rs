use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::api::AnalysisEndpoint;
use crate::client::cache::ResultCache;
use crate::client::ClientError;
use crate::models::analysis::{AnalysisResult, AnalysisStatus, AnalysisType};
use crate::models::api::StatusResponse;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// What is being polled for.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub scan_id: String,
    pub image_index: u32,
    pub analysis_type: AnalysisType,
}

/// Watches one analysis until the server reports a terminal outcome.
pub struct StatusPoller {
    endpoint: Arc<dyn AnalysisEndpoint>,
    cache: Arc<Mutex<ResultCache>>,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(
        endpoint: Arc<dyn AnalysisEndpoint>,
        cache: Arc<Mutex<ResultCache>>,
        config: PollerConfig,
    ) -> Self {
        Self {
            endpoint,
            cache,
            config,
        }
    }

    /// Read status every `poll_interval` until completed or failed.
    ///
    /// The first read happens one interval after the call. Unreadable
    /// statuses (transport errors, 404 before the job row exists) count as
    /// an attempt and polling continues. A completed analysis is written to
    /// the result cache before it is returned.
    pub async fn poll_analysis_results(
        &self,
        target: &PollTarget,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, ClientError> {
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            attempts += 1;

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                read = self.endpoint.fetch_status(&target.scan_id, target.image_index) => read,
            };

            match read {
                Ok(status) => match status.analysis_status {
                    AnalysisStatus::Completed => {
                        let result = completed_result(target, &status);
                        self.cache.lock().await.set(result.clone());
                        tracing::info!(
                            scan_id = %target.scan_id,
                            image_index = target.image_index,
                            attempts,
                            "Analysis completed"
                        );
                        return Ok(result);
                    }
                    AnalysisStatus::Failed => {
                        return Err(ClientError::AnalysisFailed(
                            status
                                .error
                                .unwrap_or_else(|| "Analysis failed".to_string()),
                        ));
                    }
                    AnalysisStatus::Pending | AnalysisStatus::Processing => {
                        tracing::debug!(
                            scan_id = %target.scan_id,
                            attempt = attempts,
                            scan_status = ?status.scan_status,
                            "Analysis still running"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        scan_id = %target.scan_id,
                        attempt = attempts,
                        error = %e,
                        "Status read failed, will retry"
                    );
                }
            }

            if attempts >= self.config.max_attempts {
                return Err(ClientError::PollTimeout { attempts });
            }
        }
    }
}

/// Build the client record for a completed status read.
pub fn completed_result(target: &PollTarget, status: &StatusResponse) -> AnalysisResult {
    AnalysisResult {
        id: Uuid::new_v4(),
        scan_id: target.scan_id.clone(),
        image_index: target.image_index,
        analysis_type: status.analysis_type.unwrap_or(target.analysis_type),
        status: AnalysisStatus::Completed,
        confidence: status.overall_confidence.or(status.ssim),
        findings: json!({
            "detected_case": status.detected_case,
            "confidence_scores": status.confidence_scores,
            "findings": status.findings,
            "ssim": status.ssim,
            "medical_note": status.medical_note,
        }),
        processing_time: status.processing_time,
        created_at: Utc::now(),
    }
}
