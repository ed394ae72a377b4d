use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::analysis::AnalysisOutput;
use crate::models::status::{validate_transition, ScanStatus, TransitionError};

/// Failed attempts tolerated before a job is parked as `failed`.
pub const MAX_RETRIES: i32 = 3;

/// Dispatch priority. Higher levels are dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn level(self) -> i16 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }

    pub fn from_level(level: i16) -> Option<Self> {
        match level {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            4 => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Request to put a scan on the analysis queue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub scan_id: String,
    pub scan_type: String,
    pub priority: Priority,
    pub body_region: Option<String>,
    pub image_index: u32,
}

impl NewJob {
    pub fn new(scan_id: impl Into<String>, scan_type: impl Into<String>, priority: Priority) -> Self {
        Self {
            scan_id: scan_id.into(),
            scan_type: scan_type.into(),
            priority,
            body_region: None,
            image_index: 0,
        }
    }

    pub fn with_body_region(mut self, region: impl Into<String>) -> Self {
        self.body_region = Some(region.into());
        self
    }

    pub fn with_image_index(mut self, image_index: u32) -> Self {
        self.image_index = image_index;
        self
    }
}

/// Queue/processing state of a scan, one per scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub scan_id: String,
    pub scan_type: String,
    pub body_region: Option<String>,
    pub image_index: u32,
    pub priority: Priority,
    pub queue_position: i64,
    pub status: ScanStatus,
    pub retry_count: i32,
    pub last_error_message: Option<String>,
    pub analysis: Option<AnalysisOutput>,
    pub processing_start_time: Option<DateTime<Utc>>,
    pub processing_end_time: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly queued job. Retry state always starts from zero.
    pub fn queued(new: NewJob, queue_position: i64) -> Self {
        let now = Utc::now();
        Self {
            scan_id: new.scan_id,
            scan_type: new.scan_type,
            body_region: new.body_region,
            image_index: new.image_index,
            priority: new.priority,
            queue_position,
            status: ScanStatus::Queued,
            retry_count: 0,
            last_error_message: None,
            analysis: None,
            processing_start_time: None,
            processing_end_time: None,
            processing_duration_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn priority_level(&self) -> i16 {
        self.priority.level()
    }

    /// Dispatch order: higher priority level first, then lower queue
    /// position, then earlier creation.
    pub fn dispatch_order(&self, other: &Self) -> Ordering {
        other
            .priority_level()
            .cmp(&self.priority_level())
            .then(self.queue_position.cmp(&other.queue_position))
            .then(self.created_at.cmp(&other.created_at))
    }

    /// Move to `to` if the state machine allows it.
    ///
    /// Entering `queue_processing` stamps the start time; entering a terminal
    /// status stamps the end time and duration.
    pub fn transition_to(&mut self, to: ScanStatus) -> Result<(), TransitionError> {
        validate_transition(self.status, to)?;

        let now = Utc::now();
        if to == ScanStatus::QueueProcessing {
            self.processing_start_time = Some(now);
            self.processing_end_time = None;
            self.processing_duration_ms = None;
        }
        if to.is_terminal() {
            self.processing_end_time = Some(now);
            self.processing_duration_ms = self
                .processing_start_time
                .map(|start| (now - start).num_milliseconds().max(0));
        }

        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}
