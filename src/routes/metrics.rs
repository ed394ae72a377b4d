use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and register the queue metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "analysis_jobs_enqueued_total",
        "Scan analysis jobs accepted onto the queue"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Scan analysis jobs that reached a completed status"
    );
    metrics::describe_counter!(
        "analysis_jobs_retried_total",
        "Failed processing attempts returned to the queue"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Scan analysis jobs that ended failed or queue_failed"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Wall time of a successful dispatch cycle"
    );
    metrics::describe_gauge!(
        "analysis_queue_depth",
        "Jobs waiting in queued status"
    );

    Ok(Arc::new(handle))
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
