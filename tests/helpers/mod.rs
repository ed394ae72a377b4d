//! Fakes for the scheduler's collaborators and builders for scripted
//! inference results.

#![allow(dead_code)]

use async_trait::async_trait;
use scan_analysis_queue::{
    db::InMemoryJobStore,
    models::analysis::{
        AnalysisType, ClassificationResult, ConversionResult, Finding, InferenceResult,
        NarrativeReport,
    },
    services::{
        inference::{InferenceBackend, InferenceError},
        scheduler::{QueueScheduler, SchedulerConfig},
        storage::{ImageSource, StorageError},
    },
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub const PNG_HEADER: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// Images held in memory, keyed by (scan id, image index).
#[derive(Default)]
pub struct MemoryImages {
    images: HashMap<(String, u32), Vec<u8>>,
}

impl MemoryImages {
    pub fn with(mut self, scan_id: &str, image_index: u32) -> Self {
        self.images
            .insert((scan_id.to_string(), image_index), PNG_HEADER.to_vec());
        self
    }
}

#[async_trait]
impl ImageSource for MemoryImages {
    async fn fetch(&self, scan_id: &str, image_index: u32) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.images.get(&(scan_id.to_string(), image_index)).cloned())
    }
}

pub fn classification(findings: &[&str]) -> ClassificationResult {
    ClassificationResult {
        detected_case: findings.first().copied().unwrap_or("no_tumor").to_string(),
        overall_confidence: 0.93,
        confidence_scores: BTreeMap::from([("glioma".to_string(), 0.93), ("no_tumor".to_string(), 0.07)]),
        findings: findings
            .iter()
            .map(|label| Finding {
                label: label.to_string(),
                confidence: Some(0.93),
                location: None,
            })
            .collect(),
    }
}

pub fn conversion() -> ConversionResult {
    ConversionResult {
        input_image: "aW5wdXQ=".to_string(),
        output_image: "b3V0cHV0".to_string(),
        ssim: 0.87,
    }
}

fn report(analysis: AnalysisType) -> NarrativeReport {
    NarrativeReport {
        medical_note: format!("{analysis} reviewed"),
        recommendations: vec!["Follow up in 6 months".to_string()],
    }
}

fn canned(analysis: AnalysisType, findings: &[&str]) -> InferenceResult {
    if analysis.is_conversion() {
        InferenceResult::Conversion(conversion())
    } else {
        InferenceResult::Classification(classification(findings))
    }
}

/// Fails the first `failures` analyze calls with a 503, then succeeds.
pub struct FlakyInference {
    failures: u32,
    findings: Vec<&'static str>,
    calls: AtomicU32,
}

impl FlakyInference {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            findings: vec!["glioma"],
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(0)
    }

    pub fn without_findings(mut self) -> Self {
        self.findings.clear();
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for FlakyInference {
    async fn analyze(
        &self,
        _image: &[u8],
        analysis: AnalysisType,
    ) -> Result<InferenceResult, InferenceError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(InferenceError::Status {
                status: 503,
                body: format!("model unavailable (attempt {attempt})"),
            });
        }
        Ok(canned(analysis, &self.findings))
    }

    async fn generate_report(
        &self,
        analysis: AnalysisType,
        _result: &InferenceResult,
    ) -> Result<NarrativeReport, InferenceError> {
        Ok(report(analysis))
    }
}

/// Parks inside `analyze` until released, so a test can observe the
/// scheduler mid-job.
#[derive(Default)]
pub struct GatedInference {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl InferenceBackend for GatedInference {
    async fn analyze(
        &self,
        _image: &[u8],
        analysis: AnalysisType,
    ) -> Result<InferenceResult, InferenceError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(canned(analysis, &[]))
    }

    async fn generate_report(
        &self,
        analysis: AnalysisType,
        _result: &InferenceResult,
    ) -> Result<NarrativeReport, InferenceError> {
        Ok(report(analysis))
    }
}

pub fn scheduler(
    store: Arc<InMemoryJobStore>,
    images: MemoryImages,
    inference: Arc<dyn InferenceBackend>,
) -> QueueScheduler {
    QueueScheduler::new(store, Arc::new(images), inference, SchedulerConfig::default())
}
