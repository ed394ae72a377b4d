use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::analysis::AnalysisType;
use crate::models::api::{AnalyzeRequest, AnalyzeResponse, StatusQuery, StatusResponse};
use crate::models::job::{Job, NewJob};
use crate::models::status::ScanStatus;

/// POST /scans/{scan_id}/analyze: queue a scan for analysis.
///
/// A job that is already queued or running is left alone; a request for a
/// different image or analysis while it is pending gets 409. A completed job
/// for the same analysis and image is returned as-is unless `force` is set.
pub async fn trigger_analysis(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
    Json(request): Json<AnalyzeRequest>,
) -> (StatusCode, Json<AnalyzeResponse>) {
    if let Err(e) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AnalyzeResponse::error(e.to_string())),
        );
    }

    let existing = match state.store.get(&scan_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(scan_id = %scan_id, error = %e, "Failed to load scan job");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AnalyzeResponse::error("Failed to load scan job")),
            );
        }
    };

    if let Some(job) = existing {
        if job.status == ScanStatus::Queued || job.status.is_in_flight() {
            if !is_same_work(&job, &request) {
                tracing::warn!(
                    scan_id = %scan_id,
                    pending_image_index = job.image_index,
                    requested_image_index = request.image_index,
                    "Analysis already pending for another image or type"
                );
                return (
                    StatusCode::CONFLICT,
                    Json(AnalyzeResponse::error(
                        "scan already has an analysis in progress for another image",
                    )),
                );
            }
            return (StatusCode::OK, Json(AnalyzeResponse::success(job.status)));
        }
        if !request.force && is_reusable(&job, &request) {
            tracing::debug!(scan_id = %scan_id, status = %job.status, "Returning completed analysis");
            return (StatusCode::OK, Json(AnalyzeResponse::success(job.status)));
        }
    }

    let mut new_job = NewJob::new(
        scan_id.clone(),
        request.analysis_type.to_string(),
        request.priority.unwrap_or_default(),
    )
    .with_image_index(request.image_index);
    if let Some(region) = request.body_region {
        new_job = new_job.with_body_region(region);
    }

    if state.queue.enqueue(new_job).await {
        (
            StatusCode::OK,
            Json(AnalyzeResponse::success(ScanStatus::Queued)),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AnalyzeResponse::error("Failed to queue scan for analysis")),
        )
    }
}

/// A pending job answers the request when it targets the same image and,
/// if its scan type names a category, the same analysis.
fn is_same_work(job: &Job, request: &AnalyzeRequest) -> bool {
    job.image_index == request.image_index
        && AnalysisType::from_scan_type(&job.scan_type)
            .map_or(true, |pending| pending == request.analysis_type)
}

fn is_reusable(job: &Job, request: &AnalyzeRequest) -> bool {
    job.status.is_success()
        && job.image_index == request.image_index
        && job
            .analysis
            .as_ref()
            .is_some_and(|output| output.analysis_type == request.analysis_type)
}

/// GET /scans/{scan_id}/analysis-status?imageIndex=N: current job status.
pub async fn analysis_status(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let job = state.store.get(&scan_id).await.map_err(|e| {
        tracing::error!(scan_id = %scan_id, error = %e, "Failed to load scan job");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match job {
        Some(job) if job.image_index == query.image_index => Ok(Json(StatusResponse::from_job(&job))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}
