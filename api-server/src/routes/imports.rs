//! CSV upload and import job submission.

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::import::resolve_source;
use crate::jobs::{ImportPayload, JobQueue};
use rocket::data::{ByteUnit, Data};
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response returned once an import job is queued.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ImportQueuedResponse {
    /// Identifier of the queued job.
    #[serde(rename = "jobId")]
    pub job_id: i32,
    /// File reference the job will read, relative to the upload directory.
    pub file: String,
}

fn job_queue(pool: &sqlx::PgPool, config: &AppConfig) -> JobQueue {
    JobQueue::new(pool.clone()).with_max_attempts(config.jobs.max_attempts)
}

/// Store a raw CSV body under the upload directory and queue its import.
#[post("/imports", data = "<body>")]
pub async fn upload_members(
    body: Data<'_>,
    pool: &State<sqlx::PgPool>,
    config: &State<AppConfig>,
) -> Result<Json<ImportQueuedResponse>, ApiError> {
    let base_dir = &config.import.base_dir;
    tokio::fs::create_dir_all(base_dir)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to prepare upload directory: {e}")))?;

    let file = format!("{}.csv", Uuid::new_v4().simple());
    let path = base_dir.join(&file);

    let written = body
        .open(ByteUnit::from(config.max_upload_bytes))
        .into_file(&path)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store upload: {e}")))?;

    if !written.is_complete() {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(ApiError::BadRequest(format!(
            "Upload exceeds the {} byte limit",
            config.max_upload_bytes
        )));
    }

    if written.n.written == 0 {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(ApiError::BadRequest("Upload is empty".to_string()));
    }

    let job_id = job_queue(pool.inner(), config.inner())
        .enqueue_import(&file)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to enqueue import: {e}")))?;

    log::info!(
        "stored upload {} ({} bytes), queued job {}",
        file,
        written.n.written,
        job_id
    );

    Ok(Json(ImportQueuedResponse { job_id, file }))
}

/// Queue an import for a file that is already in the upload directory.
#[openapi(tag = "Imports")]
#[post("/imports/queue", data = "<request>")]
pub async fn queue_import(
    request: Json<ImportPayload>,
    pool: &State<sqlx::PgPool>,
    config: &State<AppConfig>,
) -> Result<Json<ImportQueuedResponse>, ApiError> {
    let path = resolve_source(&config.import.base_dir, &request.file)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::NotFound(format!(
            "File '{}' not found in upload directory",
            request.file
        )));
    }

    let job_id = job_queue(pool.inner(), config.inner())
        .enqueue_import(&request.file)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to enqueue import: {e}")))?;

    Ok(Json(ImportQueuedResponse {
        job_id,
        file: request.into_inner().file,
    }))
}
