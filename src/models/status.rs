//! Scan processing state machine.
//!
//! ```text
//! queued -> queue_processing -> ai_processing[_*] -> report_generating
//!        -> completed_with_findings | completed_no_findings | translation_completed
//! ```
//!
//! `failed` and `queue_failed` are reachable from every in-flight state, and
//! `queued` is the re-entry point for retries.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::models::analysis::AnalysisType;

/// Persisted status of a scan's analysis job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanStatus {
    Queued,
    QueueProcessing,
    AiProcessingBrain,
    AiProcessingBreast,
    AiProcessingLung,
    AiProcessingCtToMri,
    AiProcessingMriToCt,
    AiProcessing,
    ReportGenerating,
    CompletedWithFindings,
    CompletedNoFindings,
    TranslationCompleted,
    Failed,
    QueueFailed,
}

impl ScanStatus {
    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompletedWithFindings
                | Self::CompletedNoFindings
                | Self::TranslationCompleted
                | Self::Failed
                | Self::QueueFailed
        )
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::CompletedWithFindings | Self::CompletedNoFindings | Self::TranslationCompleted
        )
    }

    /// Statuses held by the job currently owned by the scheduler.
    pub fn is_in_flight(self) -> bool {
        self == Self::QueueProcessing || self.is_inference() || self == Self::ReportGenerating
    }

    pub fn is_inference(self) -> bool {
        matches!(
            self,
            Self::AiProcessingBrain
                | Self::AiProcessingBreast
                | Self::AiProcessingLung
                | Self::AiProcessingCtToMri
                | Self::AiProcessingMriToCt
                | Self::AiProcessing
        )
    }

    /// Inference sub-state for a resolved analysis category. Scans with no
    /// supported category use the generic `ai_processing`.
    pub fn inference_status(analysis: Option<AnalysisType>) -> Self {
        match analysis {
            Some(AnalysisType::BrainTumor) => Self::AiProcessingBrain,
            Some(AnalysisType::BreastCancer) => Self::AiProcessingBreast,
            Some(AnalysisType::LungNodule) => Self::AiProcessingLung,
            Some(AnalysisType::CtToMri) => Self::AiProcessingCtToMri,
            Some(AnalysisType::MriToCt) => Self::AiProcessingMriToCt,
            None => Self::AiProcessing,
        }
    }
}

/// Returns whether `from -> to` is an allowed mutation.
pub fn can_transition(from: ScanStatus, to: ScanStatus) -> bool {
    use ScanStatus::*;

    match from {
        Queued => matches!(to, QueueProcessing | Failed | QueueFailed),
        QueueProcessing => to.is_inference() || matches!(to, Queued | Failed | QueueFailed),
        s if s.is_inference() => matches!(to, ReportGenerating | Queued | Failed | QueueFailed),
        ReportGenerating => to.is_success() || matches!(to, Queued | Failed | QueueFailed),
        _ => false,
    }
}

/// Validate a state transition, returning a typed error for rejected ones.
pub fn validate_transition(from: ScanStatus, to: ScanStatus) -> Result<(), TransitionError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: ScanStatus,
    pub to: ScanStatus,
}
