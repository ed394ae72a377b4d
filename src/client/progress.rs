//! Simulated progress for an in-flight analysis.
//!
//! The server exposes no fine-grained progress, so the tracker walks a fixed
//! schedule of stages on a timer. It is purely cosmetic and independent of
//! the real job status.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Initializing,
    Uploading,
    Processing,
    GeneratingReport,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub stage: ProgressStage,
    /// Percent, 0 to 100.
    pub progress: u8,
    pub message: String,
    #[serde(with = "duration_secs")]
    pub estimated_time_remaining: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct StageStep {
    pub stage: ProgressStage,
    pub progress: u8,
    pub message: &'static str,
    pub duration: Duration,
}

const DEFAULT_SCHEDULE: [StageStep; 5] = [
    StageStep {
        stage: ProgressStage::Initializing,
        progress: 10,
        message: "Preparing analysis request",
        duration: Duration::from_secs(2),
    },
    StageStep {
        stage: ProgressStage::Uploading,
        progress: 30,
        message: "Sending scan to the analysis queue",
        duration: Duration::from_secs(3),
    },
    StageStep {
        stage: ProgressStage::Processing,
        progress: 70,
        message: "Running AI inference",
        duration: Duration::from_secs(15),
    },
    StageStep {
        stage: ProgressStage::GeneratingReport,
        progress: 90,
        message: "Generating report",
        duration: Duration::from_secs(3),
    },
    StageStep {
        stage: ProgressStage::Completed,
        progress: 100,
        message: "Analysis complete",
        duration: Duration::from_secs(1),
    },
];

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    schedule: Vec<StageStep>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_vec(),
        }
    }
}

impl ProgressTracker {
    pub fn with_schedule(schedule: Vec<StageStep>) -> Self {
        Self { schedule }
    }

    pub fn total_duration(&self) -> Duration {
        self.schedule.iter().map(|s| s.duration).sum()
    }

    /// State shown `elapsed` after the tracker started. Past the end of the
    /// schedule the last stage is held.
    pub fn state_at(&self, elapsed: Duration) -> Option<ProgressState> {
        let total = self.total_duration();
        let mut stage_end = Duration::ZERO;
        let mut current = None;

        for step in &self.schedule {
            current = Some(step);
            stage_end += step.duration;
            if elapsed < stage_end {
                break;
            }
        }

        current.map(|step| ProgressState {
            stage: step.stage,
            progress: step.progress,
            message: step.message.to_string(),
            estimated_time_remaining: total.saturating_sub(elapsed),
        })
    }

    /// Publish each stage on `tx` at its scheduled time. Returns once the
    /// final stage's timer fires or `cancel` trips; whatever was last sent
    /// stays visible until the caller clears it.
    pub async fn run(
        &self,
        tx: &watch::Sender<Option<ProgressState>>,
        cancel: &CancellationToken,
    ) {
        let mut elapsed = Duration::ZERO;
        for step in &self.schedule {
            tx.send_replace(self.state_at(elapsed));
            tracing::trace!(stage = ?step.stage, progress = step.progress, "Progress stage");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(step.duration) => {}
            }
            elapsed += step.duration;
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
