use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    MemberImport,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Payload carried by a `member_import` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImportPayload {
    /// File reference relative to the upload directory.
    pub file: String,
}

impl ImportPayload {
    pub fn new(file: impl Into<String>) -> Self {
        Self { file: file.into() }
    }

    /// JSON stored in `jobs.payload`.
    pub fn to_value(&self) -> Value {
        json!({ "file": self.file })
    }
}

/// A claimed job handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i32,
    pub job_type: JobType,
    pub payload: Value,
    pub attempts: i32,
}

/// Row shape returned by the job status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct JobRecord {
    pub id: i32,
    #[serde(rename = "jobType")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: Value,
    pub priority: i32,
    pub attempts: i32,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: i32,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What happened to a job after [`JobQueue::fail_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Put back in the queue for another attempt.
    Requeued,
    /// Out of attempts.
    Failed,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    max_attempts: i32,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_attempts: 3,
        }
    }

    /// Attempts granted to jobs enqueued through this handle.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Enqueue an import of `file` (relative to the upload directory).
    pub async fn enqueue_import(&self, file: &str) -> Result<i32, sqlx::Error> {
        self.enqueue_import_with_priority(file, 0).await
    }

    /// Enqueue an import with an explicit priority; higher runs first.
    pub async fn enqueue_import_with_priority(
        &self,
        file: &str,
        priority: i32,
    ) -> Result<i32, sqlx::Error> {
        let payload = ImportPayload::new(file).to_value();
        self.enqueue_job(JobType::MemberImport, payload, priority).await
    }

    /// Enqueue single job (generic)
    pub async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: Value,
        priority: i32,
    ) -> Result<i32, sqlx::Error> {
        let (id,): (i32,) = sqlx::query_as(
            r#"INSERT INTO jobs (job_type, payload, priority, max_attempts)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(job_type)
        .bind(payload)
        .bind(priority)
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        log::debug!("enqueued {:?} job {}", job_type, id);
        Ok(id)
    }

    /// Get next job atomically (SELECT FOR UPDATE SKIP LOCKED)
    pub async fn get_next_job(&self) -> Result<Option<Job>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let job: Option<(i32, JobType, Value)> = sqlx::query_as(
            r#"SELECT id, job_type, payload FROM jobs
               WHERE status = 'queued'
               ORDER BY priority DESC, created_at ASC, id ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((id, job_type, payload)) = job {
            let (attempts,): (i32,) = sqlx::query_as(
                r#"UPDATE jobs
                   SET status = 'running',
                       attempts = attempts + 1,
                       started_at = COALESCE(started_at, NOW()),
                       last_heartbeat = NOW()
                   WHERE id = $1
                   RETURNING attempts"#,
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(Some(Job {
                id,
                job_type,
                payload,
                attempts,
            }))
        } else {
            Ok(None)
        }
    }

    /// Mark job complete
    pub async fn complete_job(&self, job_id: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE jobs
               SET status = 'succeeded', completed_at = NOW(), error_message = NULL, last_heartbeat = NOW()
               WHERE id = $1"#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed attempt. The job goes back to `queued` while it has
    /// attempts left, otherwise it is marked `failed`.
    pub async fn fail_job(&self, job_id: i32, error: String) -> Result<FailureOutcome, sqlx::Error> {
        let (status,): (JobStatus,) = sqlx::query_as(
            r#"UPDATE jobs
               SET status = CASE WHEN attempts < max_attempts
                                 THEN 'queued'::job_status
                                 ELSE 'failed'::job_status END,
                   completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END,
                   error_message = $1,
                   last_heartbeat = NOW()
               WHERE id = $2
               RETURNING status"#,
        )
        .bind(error)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if status == JobStatus::Queued {
            FailureOutcome::Requeued
        } else {
            FailureOutcome::Failed
        })
    }

    /// Put `running` jobs whose heartbeat is older than `stale_after` back in
    /// the queue, or fail them when they are out of attempts. Returns how many
    /// jobs were touched.
    pub async fn requeue_stale_jobs(&self, stale_after: Duration) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = CASE WHEN attempts < max_attempts
                                 THEN 'queued'::job_status
                                 ELSE 'failed'::job_status END,
                   completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END,
                   error_message = 'worker stopped sending heartbeats'
               WHERE status = 'running'
                 AND COALESCE(last_heartbeat, started_at, created_at)
                     < NOW() - make_interval(secs => $1)"#,
        )
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Record a heartbeat/progress update for a running job.
    pub async fn heartbeat(&self, job_id: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET last_heartbeat = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_job(&self, job_id: i32) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT id, job_type, status, payload, priority, attempts, max_attempts,
                      error_message, created_at, started_at, completed_at
               FROM jobs
               WHERE id = $1"#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Most recent jobs first.
    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT id, job_type, status, payload, priority, attempts, max_attempts,
                      error_message, created_at, started_at, completed_at
               FROM jobs
               ORDER BY created_at DESC, id DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
