use clap::Parser;
use scan_analysis_queue::{
    client::{AnalysisApi, AnalysisJob, AnalysisSession, PollerConfig},
    models::{analysis::AnalysisType, job::Priority},
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Submit a scan image for AI analysis and wait for the result.
#[derive(Debug, Parser)]
#[command(name = "analyze", version)]
struct Args {
    /// Scan identifier
    scan_id: String,

    /// brain_tumor, breast_cancer, lung_nodule, ct_to_mri or mri_to_ct
    analysis_type: AnalysisType,

    /// Image within the scan
    #[arg(long, default_value_t = 0)]
    image_index: u32,

    /// low, medium, high or urgent
    #[arg(long)]
    priority: Option<Priority>,

    #[arg(long)]
    body_region: Option<String>,

    /// Re-run even if a completed analysis exists
    #[arg(long)]
    force: bool,

    /// API base URL including the version prefix
    #[arg(long, env = "ANALYSIS_API_URL", default_value = "http://localhost:3000/api/v1")]
    api_url: String,

    /// Seconds between status checks
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let session = Arc::new(AnalysisSession::new(
        Arc::new(AnalysisApi::new(&args.api_url)),
        PollerConfig {
            poll_interval: Duration::from_secs(args.poll_interval.max(1)),
            ..PollerConfig::default()
        },
    ));

    let mut job = AnalysisJob::new(&args.scan_id, args.image_index, args.analysis_type);
    if args.force {
        job = job.forced();
    }
    if let Some(priority) = args.priority {
        job = job.with_priority(priority);
    }
    if let Some(region) = &args.body_region {
        job = job.with_body_region(region);
    }

    let mut progress = session.subscribe_progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            if let Some(state) = progress.borrow_and_update().clone() {
                eprintln!(
                    "[{:>3}%] {} (~{}s remaining)",
                    state.progress,
                    state.message,
                    state.estimated_time_remaining.as_secs()
                );
            }
        }
    });

    let interrupt = Arc::clone(&session);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    match session.analyze(job).await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to render result: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) if e.is_cancelled() => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
