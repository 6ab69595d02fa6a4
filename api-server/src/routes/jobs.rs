//! Import job status endpoints.

use crate::error::ApiError;
use crate::jobs::{JobQueue, JobRecord};
use crate::models::DataResponse;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_db_pools::sqlx;
use rocket_okapi::openapi;

/// Recent jobs, newest first.
#[openapi(tag = "Jobs")]
#[get("/jobs?<limit>")]
pub async fn list_jobs(
    limit: Option<i64>,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<Vec<JobRecord>>>, ApiError> {
    let limit = limit.unwrap_or(50).clamp(1, 500);
    let jobs = JobQueue::new(pool.inner().clone())
        .list_jobs(limit)
        .await?;

    Ok(Json(DataResponse { data: jobs }))
}

/// Status of a single job.
#[openapi(tag = "Jobs")]
#[get("/jobs/<id>")]
pub async fn get_job(
    id: i32,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<JobRecord>>, ApiError> {
    let job = JobQueue::new(pool.inner().clone())
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))?;

    Ok(Json(DataResponse { data: job }))
}
