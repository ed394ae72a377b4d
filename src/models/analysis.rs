use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::models::status::ScanStatus;

/// The five inference categories served by the remote AI service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisType {
    /// Classification, brain/head region.
    BrainTumor,
    /// Classification, breast/mammography.
    BreastCancer,
    /// Classification, lung/chest/thorax.
    LungNodule,
    /// Modality conversion CT -> MRI.
    CtToMri,
    /// Modality conversion MRI -> CT.
    MriToCt,
}

impl AnalysisType {
    /// Parse a scan type that already names an analysis category
    /// (`"brain_tumor"`, `"CT-to-MRI"`, ...).
    pub fn from_scan_type(scan_type: &str) -> Option<Self> {
        let normalized = scan_type.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::from_str(&normalized).ok()
    }

    pub fn is_conversion(self) -> bool {
        matches!(self, Self::CtToMri | Self::MriToCt)
    }

    /// Path of the inference endpoint, relative to the service base URL.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::BrainTumor => "/predict/brain-tumor",
            Self::BreastCancer => "/predict/breast-cancer",
            Self::LungNodule => "/predict/lung-nodule",
            Self::CtToMri => "/translate/ct-to-mri",
            Self::MriToCt => "/translate/mri-to-ct",
        }
    }

    /// Remote call timeout. Conversions return full image payloads and get
    /// twice the classification budget.
    pub fn timeout(self) -> Duration {
        if self.is_conversion() {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(30)
        }
    }
}

/// A single positive finding reported by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub detected_case: String,
    pub overall_confidence: f64,
    #[serde(default)]
    pub confidence_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// Modality conversion output. Images are base64 payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub input_image: String,
    pub output_image: String,
    pub ssim: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceResult {
    Classification(ClassificationResult),
    Conversion(ConversionResult),
}

impl InferenceResult {
    pub fn has_findings(&self) -> bool {
        match self {
            Self::Classification(c) => !c.findings.is_empty(),
            Self::Conversion(_) => false,
        }
    }
}

/// Narrative report produced by the report-generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeReport {
    pub medical_note: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Everything a successful pipeline run leaves on the job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub analysis_type: AnalysisType,
    pub inference: InferenceResult,
    pub report: NarrativeReport,
}

/// Coarse status observed by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<ScanStatus> for AnalysisStatus {
    fn from(status: ScanStatus) -> Self {
        if status.is_success() {
            Self::Completed
        } else if status.is_terminal() {
            Self::Failed
        } else if status == ScanStatus::Queued {
            Self::Pending
        } else {
            Self::Processing
        }
    }
}

/// Client-side record of a finished analysis. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: Uuid,
    pub scan_id: String,
    pub image_index: u32,
    pub analysis_type: AnalysisType,
    pub status: AnalysisStatus,
    pub confidence: Option<f64>,
    pub findings: serde_json::Value,
    pub processing_time: Option<i64>,
    pub created_at: DateTime<Utc>,
}
