use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::models::analysis::{
    AnalysisType, ClassificationResult, ConversionResult, InferenceResult, NarrativeReport,
};

const REPORT_ENDPOINT: &str = "/report/generate";
const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote inference operations the scheduler depends on.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        analysis: AnalysisType,
    ) -> Result<InferenceResult, InferenceError>;

    async fn generate_report(
        &self,
        analysis: AnalysisType,
        result: &InferenceResult,
    ) -> Result<NarrativeReport, InferenceError>;
}

/// Pick the inference category for a scan.
///
/// A scan type that already names a category wins. Otherwise the body
/// region hint is matched by substring, with CT or MRI brain scans routed
/// to modality conversion.
pub fn select_analysis_type(
    scan_type: &str,
    body_region: Option<&str>,
) -> Result<AnalysisType, InferenceError> {
    if let Some(direct) = AnalysisType::from_scan_type(scan_type) {
        return Ok(direct);
    }

    let modality = scan_type.trim().to_ascii_lowercase();
    let region = body_region.unwrap_or_default().to_ascii_lowercase();

    let brain = contains_any(&region, &["brain", "head"]);
    if brain && is_ct(&modality) {
        return Ok(AnalysisType::CtToMri);
    }
    if brain && is_mri(&modality) {
        return Ok(AnalysisType::MriToCt);
    }
    if brain {
        return Ok(AnalysisType::BrainTumor);
    }
    if contains_any(&region, &["breast", "mammo"]) || modality.contains("mammo") {
        return Ok(AnalysisType::BreastCancer);
    }
    if contains_any(&region, &["lung", "chest", "thorax"]) {
        return Ok(AnalysisType::LungNodule);
    }

    Err(InferenceError::UnsupportedAnalysisType {
        scan_type: scan_type.to_string(),
        body_region: body_region.map(str::to_string),
    })
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn modality_tokens(modality: &str) -> impl Iterator<Item = &str> {
    modality.split(|c: char| !c.is_ascii_alphanumeric())
}

fn is_ct(modality: &str) -> bool {
    modality.contains("computed tomography") || modality_tokens(modality).any(|t| t == "ct")
}

fn is_mri(modality: &str) -> bool {
    modality.contains("magnetic resonance")
        || modality_tokens(modality).any(|t| t == "mri" || t == "mr")
}

/// HTTP client for the external inference and report service.
pub struct InferenceClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    analysis_type: AnalysisType,
    result: &'a InferenceResult,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    /// Brain tumor classification.
    pub async fn classify_brain(&self, image: &[u8]) -> Result<ClassificationResult, InferenceError> {
        self.post_image(image, AnalysisType::BrainTumor).await
    }

    /// Breast cancer classification on mammography.
    pub async fn classify_breast(&self, image: &[u8]) -> Result<ClassificationResult, InferenceError> {
        self.post_image(image, AnalysisType::BreastCancer).await
    }

    /// Lung nodule classification on chest imaging.
    pub async fn classify_lung(&self, image: &[u8]) -> Result<ClassificationResult, InferenceError> {
        self.post_image(image, AnalysisType::LungNodule).await
    }

    pub async fn convert_ct_to_mri(&self, image: &[u8]) -> Result<ConversionResult, InferenceError> {
        self.post_image(image, AnalysisType::CtToMri).await
    }

    pub async fn convert_mri_to_ct(&self, image: &[u8]) -> Result<ConversionResult, InferenceError> {
        self.post_image(image, AnalysisType::MriToCt).await
    }

    /// Ask the service for a narrative report on an inference result.
    pub async fn generate_narrative(
        &self,
        analysis: AnalysisType,
        result: &InferenceResult,
    ) -> Result<NarrativeReport, InferenceError> {
        let request = self
            .authorized(self.http.post(format!("{}{}", self.base_url, REPORT_ENDPOINT)))
            .timeout(REPORT_TIMEOUT)
            .json(&ReportRequest {
                analysis_type: analysis,
                result,
            });

        send_json(request, REPORT_TIMEOUT).await
    }

    async fn post_image<T: DeserializeOwned>(
        &self,
        image: &[u8],
        analysis: AnalysisType,
    ) -> Result<T, InferenceError> {
        let (extension, mime) = image_format(image);
        let part = Part::bytes(image.to_vec())
            .file_name(format!("scan.{}", extension))
            .mime_str(mime)?;

        tracing::debug!(
            analysis = %analysis,
            bytes = image.len(),
            mime,
            "Calling inference service"
        );

        let request = self
            .authorized(self.http.post(format!("{}{}", self.base_url, analysis.endpoint())))
            .timeout(analysis.timeout())
            .multipart(Form::new().part("file", part));

        send_json(request, analysis.timeout()).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl InferenceBackend for InferenceClient {
    async fn analyze(
        &self,
        image: &[u8],
        analysis: AnalysisType,
    ) -> Result<InferenceResult, InferenceError> {
        Ok(match analysis {
            AnalysisType::BrainTumor => InferenceResult::Classification(self.classify_brain(image).await?),
            AnalysisType::BreastCancer => InferenceResult::Classification(self.classify_breast(image).await?),
            AnalysisType::LungNodule => InferenceResult::Classification(self.classify_lung(image).await?),
            AnalysisType::CtToMri => InferenceResult::Conversion(self.convert_ct_to_mri(image).await?),
            AnalysisType::MriToCt => InferenceResult::Conversion(self.convert_mri_to_ct(image).await?),
        })
    }

    async fn generate_report(
        &self,
        analysis: AnalysisType,
        result: &InferenceResult,
    ) -> Result<NarrativeReport, InferenceError> {
        self.generate_narrative(analysis, result).await
    }
}

/// File extension and MIME type for an image payload. Unknown formats
/// (DICOM pixel data, raw buffers) go up as octet streams.
fn image_format(bytes: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => ("png", "image/png"),
        Ok(image::ImageFormat::Jpeg) => ("jpg", "image/jpeg"),
        Ok(image::ImageFormat::WebP) => ("webp", "image/webp"),
        _ => ("bin", "application/octet-stream"),
    }
}

async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<T, InferenceError> {
    let response = request.send().await.map_err(|e| classify_transport(e, timeout))?;

    let status = response.status();
    let body = response.text().await.map_err(|e| classify_transport(e, timeout))?;

    if !status.is_success() {
        return Err(InferenceError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(InferenceError::Parse)
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::Http(err)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Inference service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse inference service response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported analysis type for scan type '{scan_type}' and body region {body_region:?}")]
    UnsupportedAnalysisType {
        scan_type: String,
        body_region: Option<String>,
    },
}

impl InferenceError {
    /// Selection errors are permanent; everything else is worth a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnsupportedAnalysisType { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brain_region_routes_by_modality() {
        assert_eq!(select_analysis_type("CT", Some("Brain")).unwrap(), AnalysisType::CtToMri);
        assert_eq!(select_analysis_type("MRI", Some("brain")).unwrap(), AnalysisType::MriToCt);
        assert_eq!(select_analysis_type("X-Ray", Some("head")).unwrap(), AnalysisType::BrainTumor);
    }

    #[test]
    fn region_substrings_pick_classifiers() {
        assert_eq!(
            select_analysis_type("MG", Some("left breast")).unwrap(),
            AnalysisType::BreastCancer
        );
        assert_eq!(
            select_analysis_type("Mammography", None).unwrap(),
            AnalysisType::BreastCancer
        );
        assert_eq!(
            select_analysis_type("CT", Some("Chest/Thorax")).unwrap(),
            AnalysisType::LungNodule
        );
    }

    #[test]
    fn explicit_category_wins_over_region() {
        assert_eq!(
            select_analysis_type("lung_nodule", Some("brain")).unwrap(),
            AnalysisType::LungNodule
        );
    }

    #[test]
    fn unmatched_region_is_unsupported() {
        let err = select_analysis_type("", Some("elbow")).unwrap_err();
        assert!(matches!(err, InferenceError::UnsupportedAnalysisType { .. }));
        assert!(!err.is_retryable());

        assert!(select_analysis_type("MRI", Some("knee")).is_err());
    }

    #[test]
    fn ct_detection_needs_a_whole_token() {
        // "abstract" contains "ct" but is not a CT modality
        assert_eq!(
            select_analysis_type("abstract", Some("brain")).unwrap(),
            AnalysisType::BrainTumor
        );
    }

    #[test]
    fn png_payload_is_sniffed() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(image_format(&png), ("png", "image/png"));
        assert_eq!(image_format(b"DICM"), ("bin", "application/octet-stream"));
    }
}
