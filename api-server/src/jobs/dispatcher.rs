use std::time::Duration;

use rocket_db_pools::sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ImportConfig, JobConfig};
use crate::import::{ImportSummary, PgMemberStore, load_data};
use crate::jobs::queue::{FailureOutcome, ImportPayload, Job, JobQueue, JobType};
use crate::models::NewMember;

/// Claims jobs from the queue and runs them one at a time.
pub struct ImportDispatcher {
    pool: PgPool,
    queue: JobQueue,
    import_config: ImportConfig,
    job_config: JobConfig,
}

impl ImportDispatcher {
    pub fn new(pool: PgPool, import_config: ImportConfig, job_config: JobConfig) -> Self {
        let queue = JobQueue::new(pool.clone()).with_max_attempts(job_config.max_attempts);
        Self {
            pool,
            queue,
            import_config,
            job_config,
        }
    }

    /// Run the dispatcher loop until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!("ImportDispatcher started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.queue.requeue_stale_jobs(self.job_config.stale_after).await {
                Ok(0) => {}
                Ok(n) => log::warn!("dispatcher: requeued {} stale running job(s)", n),
                Err(e) => log::error!("dispatcher: failed to requeue stale jobs: {}", e),
            }

            let job = match self.queue.get_next_job().await {
                Ok(Some(j)) => {
                    log::info!(
                        "dispatcher: claimed job {} ({:?}, attempt {})",
                        j.id,
                        j.job_type,
                        j.attempts
                    );
                    j
                }
                Ok(None) => {
                    // No jobs available, sleep and retry
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.job_config.poll_interval) => continue,
                    }
                }
                Err(e) => {
                    log::error!("dispatcher: failed to get job: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.job_config.error_backoff) => continue,
                    }
                }
            };

            if let Err(e) = self.process_job(job).await {
                log::error!("dispatcher: job processing failed: {}", e);
            }
        }

        log::info!("ImportDispatcher stopped");
    }

    /// Run a single claimed job and record its outcome on the queue.
    pub async fn process_job(&self, job: Job) -> Result<(), String> {
        let job_id = job.id;

        let result = match job.job_type {
            JobType::MemberImport => self.run_member_import(&job).await,
        };

        match result {
            Ok(summary) => {
                log::info!(
                    "job {}: complete - {} rows, {} inserted, {} duplicates",
                    job_id,
                    summary.rows,
                    summary.stats.inserted,
                    summary.stats.skipped()
                );

                self.queue
                    .complete_job(job_id)
                    .await
                    .map_err(|e| format!("Failed to mark job complete: {}", e))?;
                Ok(())
            }
            Err(error_msg) => {
                match self.queue.fail_job(job_id, error_msg.clone()).await {
                    Ok(FailureOutcome::Requeued) => {
                        log::warn!("job {}: attempt {} failed, requeued: {}", job_id, job.attempts, error_msg);
                    }
                    Ok(FailureOutcome::Failed) => {
                        log::error!("job {}: failed after {} attempts: {}", job_id, job.attempts, error_msg);
                    }
                    Err(err) => {
                        log::error!("Failed to mark job {} as failed: {}", job_id, err);
                    }
                }
                Err(error_msg)
            }
        }
    }

    async fn run_member_import(&self, job: &Job) -> Result<ImportSummary, String> {
        let payload: ImportPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| format!("Invalid import payload: {}", e))?;

        log::info!("job {}: importing members from '{}'", job.id, payload.file);
        let heartbeat = self.spawn_heartbeat(job.id);

        let store = PgMemberStore::new(self.pool.clone());
        let result = load_data::<NewMember, _>(&self.import_config, &payload.file, store)
            .await
            .map_err(|e| format!("Import of '{}' failed: {}", payload.file, e));

        heartbeat.abort();
        result
    }

    /// Keep `last_heartbeat` fresh while a job runs so other dispatchers do
    /// not treat it as stale.
    fn spawn_heartbeat(&self, job_id: i32) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let every = (self.job_config.stale_after / 3).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = queue.heartbeat(job_id).await {
                    log::warn!("job {}: heartbeat failed (non-fatal): {}", job_id, e);
                }
            }
        })
    }
}
