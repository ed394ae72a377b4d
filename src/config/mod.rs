use serde::Deserialize;
use std::time::Duration;

use crate::services::scheduler::SchedulerConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Base URL of the inference / report service
    pub inference_base_url: String,

    /// Bearer token for the inference service, if it requires one
    #[serde(default)]
    pub inference_api_token: Option<String>,

    /// R2 bucket holding scan images
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Dispatch timer period in seconds
    #[serde(default = "default_scheduler_tick_secs")]
    pub scheduler_tick_secs: u64,

    /// Run the queue scheduler inside the API server. Disable when the
    /// standalone worker binary owns dispatch; only one may run.
    #[serde(default = "default_embedded_scheduler")]
    pub embedded_scheduler: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_scheduler_tick_secs() -> u64 {
    5
}

fn default_embedded_scheduler() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: Duration::from_secs(self.scheduler_tick_secs.max(1)),
            ..SchedulerConfig::default()
        }
    }
}
