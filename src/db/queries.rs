use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::db::{JobStore, StoreError};
use crate::models::analysis::AnalysisOutput;
use crate::models::job::{Job, Priority};
use crate::models::status::ScanStatus;

const JOB_COLUMNS: &str = r#"
    scan_id, scan_type, body_region, image_index, priority_level, queue_position,
    status, retry_count, last_error_message, analysis, processing_start_time,
    processing_end_time, processing_duration_ms, created_at, updated_at
"#;

/// `scan_jobs` table access.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let scan_id: String = row.try_get("scan_id")?;
    let decode_err = |reason: String| StoreError::Decode {
        scan_id: scan_id.clone(),
        reason,
    };

    let status_str: String = row.try_get("status")?;
    let status = ScanStatus::from_str(&status_str)
        .map_err(|_| decode_err(format!("unknown status '{}'", status_str)))?;

    let level: i16 = row.try_get("priority_level")?;
    let priority = Priority::from_level(level)
        .ok_or_else(|| decode_err(format!("priority level {} out of range", level)))?;

    let image_index: i32 = row.try_get("image_index")?;
    let image_index = u32::try_from(image_index)
        .map_err(|_| decode_err(format!("negative image index {}", image_index)))?;

    let analysis: Option<Json<AnalysisOutput>> = row.try_get("analysis")?;

    Ok(Job {
        scan_id: scan_id.clone(),
        scan_type: row.try_get("scan_type")?,
        body_region: row.try_get("body_region")?,
        image_index,
        priority,
        queue_position: row.try_get("queue_position")?,
        status,
        retry_count: row.try_get("retry_count")?,
        last_error_message: row.try_get("last_error_message")?,
        analysis: analysis.map(|Json(output)| output),
        processing_start_time: row.try_get("processing_start_time")?,
        processing_end_time: row.try_get("processing_end_time")?,
        processing_duration_ms: row.try_get("processing_duration_ms")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (
                scan_id, scan_type, body_region, image_index, priority_level, queue_position,
                status, retry_count, last_error_message, analysis, processing_start_time,
                processing_end_time, processing_duration_ms, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (scan_id) DO UPDATE SET
                scan_type = EXCLUDED.scan_type,
                body_region = EXCLUDED.body_region,
                image_index = EXCLUDED.image_index,
                priority_level = EXCLUDED.priority_level,
                queue_position = EXCLUDED.queue_position,
                status = EXCLUDED.status,
                retry_count = EXCLUDED.retry_count,
                last_error_message = EXCLUDED.last_error_message,
                analysis = EXCLUDED.analysis,
                processing_start_time = EXCLUDED.processing_start_time,
                processing_end_time = EXCLUDED.processing_end_time,
                processing_duration_ms = EXCLUDED.processing_duration_ms,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&job.scan_id)
        .bind(&job.scan_type)
        .bind(&job.body_region)
        .bind(job.image_index as i32)
        .bind(job.priority_level())
        .bind(job.queue_position)
        .bind(job.status.as_ref())
        .bind(job.retry_count)
        .bind(&job.last_error_message)
        .bind(job.analysis.as_ref().map(Json))
        .bind(job.processing_start_time)
        .bind(job.processing_end_time)
        .bind(job.processing_duration_ms)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = $2,
                retry_count = $3,
                last_error_message = $4,
                analysis = $5,
                processing_start_time = $6,
                processing_end_time = $7,
                processing_duration_ms = $8,
                updated_at = $9
            WHERE scan_id = $1
            "#,
        )
        .bind(&job.scan_id)
        .bind(job.status.as_ref())
        .bind(job.retry_count)
        .bind(&job.last_error_message)
        .bind(job.analysis.as_ref().map(Json))
        .bind(job.processing_start_time)
        .bind(job.processing_end_time)
        .bind(job.processing_duration_ms)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.scan_id.clone()));
        }
        Ok(())
    }

    async fn get(&self, scan_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scan_jobs WHERE scan_id = $1",
            JOB_COLUMNS
        ))
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn max_queue_position(&self) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT MAX(queue_position) AS max_position FROM scan_jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("max_position")?)
    }

    async fn next_queued(&self) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM scan_jobs
            WHERE status = 'queued'
            ORDER BY priority_level DESC, queue_position ASC, created_at ASC
            LIMIT 1
            "#,
            JOB_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_by_status(&self, statuses: &[ScanStatus]) -> Result<Vec<Job>, StoreError> {
        let names: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM scan_jobs
            WHERE status = ANY($1)
            ORDER BY priority_level DESC, queue_position ASC, created_at ASC
            "#,
            JOB_COLUMNS
        ))
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn count_by_status(&self, status: ScanStatus) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM scan_jobs WHERE status = $1")
            .bind(status.as_ref())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("total")?)
    }

    async fn mark_queue_failed(&self, scan_id: &str, message: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'queue_failed',
                last_error_message = $2,
                updated_at = NOW()
            WHERE scan_id = $1
            "#,
        )
        .bind(scan_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
