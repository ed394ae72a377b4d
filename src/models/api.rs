//! JSON bodies of the analyze-trigger and status-read endpoints, shared by
//! the axum handlers and the HTTP client.

use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::analysis::{AnalysisStatus, AnalysisType, Finding, InferenceResult};
use crate::models::job::{Job, Priority};
use crate::models::status::ScanStatus;

/// Body of `POST /scans/{scan_id}/analyze`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[garde(skip)]
    pub analysis_type: AnalysisType,

    #[serde(default)]
    #[garde(range(max = 4096))]
    pub image_index: u32,

    /// Bypass the completed-result short-circuit.
    #[serde(default)]
    #[garde(skip)]
    pub force: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = 64))]
    pub body_region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeData {
    pub status: ScanStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AnalyzeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalyzeResponse {
    pub fn success(status: ScanStatus) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Some(AnalyzeData { status }),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub image_index: u32,
}

/// Body of `GET /scans/{scan_id}/analysis-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub analysis_status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_status: Option<ScanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<AnalysisType>,
    #[serde(default)]
    pub image_index: u32,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(rename = "detected_case", default, skip_serializing_if = "Option::is_none")]
    pub detected_case: Option<String>,
    #[serde(rename = "overall_confidence", default, skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    #[serde(rename = "confidence_scores", default, skip_serializing_if = "Option::is_none")]
    pub confidence_scores: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssim: Option<f64>,
    #[serde(rename = "medical_note", default, skip_serializing_if = "Option::is_none")]
    pub medical_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn new(analysis_status: AnalysisStatus) -> Self {
        Self {
            analysis_status,
            scan_status: None,
            analysis_type: None,
            image_index: 0,
            retry_count: 0,
            detected_case: None,
            overall_confidence: None,
            confidence_scores: None,
            findings: Vec::new(),
            ssim: None,
            medical_note: None,
            processing_time: None,
            error: None,
        }
    }

    /// Client view of a job. Retried failures stay hidden until the job
    /// is terminally failed.
    pub fn from_job(job: &Job) -> Self {
        let mut body = Self::new(AnalysisStatus::from(job.status));
        body.scan_status = Some(job.status);
        body.image_index = job.image_index;
        body.retry_count = job.retry_count;
        body.processing_time = job.processing_duration_ms;

        if job.status.is_terminal() && !job.status.is_success() {
            body.error = job.last_error_message.clone();
        }

        if let Some(output) = &job.analysis {
            body.analysis_type = Some(output.analysis_type);
            body.medical_note = Some(output.report.medical_note.clone());
            match &output.inference {
                InferenceResult::Classification(c) => {
                    body.detected_case = Some(c.detected_case.clone());
                    body.overall_confidence = Some(c.overall_confidence);
                    body.confidence_scores = Some(c.confidence_scores.clone());
                    body.findings = c.findings.clone();
                }
                InferenceResult::Conversion(c) => {
                    body.ssim = Some(c.ssim);
                }
            }
        }

        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_request_uses_camel_case_and_defaults() {
        let req: AnalyzeRequest = serde_json::from_value(serde_json::json!({
            "analysisType": "mri_to_ct",
            "imageIndex": 3
        }))
        .unwrap();

        assert_eq!(req.analysis_type, AnalysisType::MriToCt);
        assert_eq!(req.image_index, 3);
        assert!(!req.force);
        assert!(req.priority.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn empty_body_region_is_rejected() {
        let req = AnalyzeRequest {
            analysis_type: AnalysisType::LungNodule,
            image_index: 0,
            force: false,
            priority: Some(Priority::Urgent),
            body_region: Some(String::new()),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn status_response_mixes_field_casing() {
        let mut body = StatusResponse::new(AnalysisStatus::Completed);
        body.detected_case = Some("glioma".to_string());
        body.processing_time = Some(1200);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["analysisStatus"], "completed");
        assert_eq!(json["detected_case"], "glioma");
        assert_eq!(json["processingTime"], 1200);
        assert!(json.get("ssim").is_none());
    }

    #[test]
    fn retried_failure_is_not_exposed() {
        let mut job = Job::queued(
            crate::models::job::NewJob::new("scan-1", "lung_nodule", Priority::High),
            1,
        );
        job.retry_count = 2;
        job.last_error_message = Some("inference timeout".to_string());

        let body = StatusResponse::from_job(&job);
        assert_eq!(body.analysis_status, AnalysisStatus::Pending);
        assert_eq!(body.scan_status, Some(ScanStatus::Queued));
        assert_eq!(body.retry_count, 2);
        assert!(body.error.is_none());
    }
}
