use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use member_api::config::{AppConfig, ImportConfig, JobConfig};
use member_api::import::{PgMemberStore, load_data};
use member_api::jobs::{ImportDispatcher, JobQueue, JobStatus};
use member_api::models::NewMember;
use member_api::routes::imports::{ImportQueuedResponse, upload_members};
use member_api::test_support::{
    TestDatabase, TestDatabaseError, TestFixtures, TestRocketBuilder, sample_member,
};
use rocket::http::{ContentType, Status};
use rocket::routes;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping import test: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn job_config() -> JobConfig {
    JobConfig {
        run_dispatcher: false,
        poll_interval: Duration::from_millis(50),
        error_backoff: Duration::from_millis(50),
        max_attempts: 2,
        stale_after: Duration::from_secs(60),
    }
}

fn members_csv(rows: usize) -> String {
    let mut csv = String::from("id,account_id,client_member_id,first_name,last_name,email,notes\n");
    for n in 0..rows {
        writeln!(
            csv,
            "{n},1,M-{n:05},First{n},Last{n},m{n}@example.com,imported"
        )
        .unwrap();
    }
    csv
}

fn write_file(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("write csv");
}

#[tokio::test]
async fn queued_import_loads_members_and_removes_file() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let upload = tempfile::tempdir().expect("tempdir");
    write_file(upload.path(), "members.csv", &members_csv(2500));

    // One member already exists; its row must be skipped, not fail the batch.
    TestFixtures::new(&pool)
        .insert_member(&sample_member(1, "M-00042"))
        .await
        .expect("seed member");

    let queue = JobQueue::new(pool.clone()).with_max_attempts(2);
    let job_id = queue.enqueue_import("members.csv").await.expect("enqueue");

    let dispatcher = ImportDispatcher::new(
        pool.clone(),
        ImportConfig::new(upload.path(), 1000),
        job_config(),
    );
    let job = queue
        .get_next_job()
        .await
        .expect("claim")
        .expect("job is queued");
    assert_eq!(job.id, job_id);
    assert_eq!(job.attempts, 1);

    dispatcher.process_job(job).await.expect("job succeeds");

    let count = TestFixtures::new(&pool).member_count().await.expect("count");
    assert_eq!(count, 2500);

    let seeded_name: String = sqlx::query_scalar(
        "SELECT first_name FROM members WHERE account_id = 1 AND client_member_id = 'M-00042'",
    )
    .fetch_one(&pool)
    .await
    .expect("seeded member");
    assert_eq!(seeded_name, "Ada");

    let record = queue.get_job(job_id).await.expect("lookup").expect("job exists");
    assert_eq!(record.status, JobStatus::Succeeded);
    assert!(!upload.path().join("members.csv").exists());

    test_db.close().await.expect("failed to stop test database");
}

#[tokio::test]
async fn failing_row_keeps_file_and_committed_batches() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let upload = tempfile::tempdir().expect("tempdir");

    let mut csv = members_csv(3);
    csv.push_str("99,not-a-number,M-bad,Bad,Row,bad@example.com,x\n");
    write_file(upload.path(), "broken.csv", &csv);

    let queue = JobQueue::new(pool.clone()).with_max_attempts(2);
    let job_id = queue.enqueue_import("broken.csv").await.expect("enqueue");
    let dispatcher = ImportDispatcher::new(
        pool.clone(),
        ImportConfig::new(upload.path(), 2),
        job_config(),
    );

    let job = queue.get_next_job().await.expect("claim").expect("job");
    dispatcher.process_job(job).await.expect_err("bad row fails the job");

    // First chunk of two went in before the failure.
    let count = TestFixtures::new(&pool).member_count().await.expect("count");
    assert_eq!(count, 2);
    assert!(upload.path().join("broken.csv").exists());

    let record = queue.get_job(job_id).await.expect("lookup").expect("job");
    assert_eq!(record.status, JobStatus::Queued, "first failure requeues");
    assert!(record.error_message.as_deref().unwrap_or("").contains("account_id"));

    let job = queue.get_next_job().await.expect("claim").expect("retry");
    assert_eq!(job.attempts, 2);
    dispatcher.process_job(job).await.expect_err("still broken");

    let record = queue.get_job(job_id).await.expect("lookup").expect("job");
    assert_eq!(record.status, JobStatus::Failed);

    // Re-running never duplicated the committed rows.
    let count = TestFixtures::new(&pool).member_count().await.expect("count");
    assert_eq!(count, 2);

    test_db.close().await.expect("failed to stop test database");
}

#[tokio::test]
async fn running_job_without_heartbeat_is_requeued() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let queue = JobQueue::new(pool.clone()).with_max_attempts(2);

    let abandoned = queue.enqueue_import("abandoned.csv").await.expect("enqueue");
    let job = queue.get_next_job().await.expect("claim").expect("job");
    assert_eq!(job.id, abandoned);

    // Nothing is stale while the heartbeat is fresh.
    let touched = queue
        .requeue_stale_jobs(Duration::from_secs(60))
        .await
        .expect("requeue");
    assert_eq!(touched, 0);

    sqlx::query("UPDATE jobs SET last_heartbeat = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(abandoned)
        .execute(&pool)
        .await
        .expect("age heartbeat");

    let touched = queue
        .requeue_stale_jobs(Duration::from_secs(60))
        .await
        .expect("requeue");
    assert_eq!(touched, 1);

    let record = queue.get_job(abandoned).await.expect("lookup").expect("job");
    assert_eq!(record.status, JobStatus::Queued);
    assert!(record.error_message.as_deref().unwrap_or("").contains("heartbeat"));

    let retry = queue.get_next_job().await.expect("claim").expect("requeued job");
    assert_eq!(retry.id, abandoned);
    assert_eq!(retry.attempts, 2);

    // Out of attempts: a second stale run fails the job for good.
    sqlx::query("UPDATE jobs SET last_heartbeat = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(abandoned)
        .execute(&pool)
        .await
        .expect("age heartbeat");
    queue
        .requeue_stale_jobs(Duration::from_secs(60))
        .await
        .expect("requeue");

    let record = queue.get_job(abandoned).await.expect("lookup").expect("job");
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.completed_at.is_some());

    test_db.close().await.expect("failed to stop test database");
}

#[tokio::test]
async fn duplicates_inside_a_file_are_ignored() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let upload = tempfile::tempdir().expect("tempdir");
    write_file(
        upload.path(),
        "dupes.csv",
        "account_id,client_member_id,first_name,last_name\n1,A,Ada,L\n1,A,Ada,L\n2,A,Ada,L\n",
    );

    let summary = load_data::<NewMember, _>(
        &ImportConfig::new(upload.path(), 1000),
        "dupes.csv",
        PgMemberStore::new(pool.clone()),
    )
    .await
    .expect("import succeeds");

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.stats.inserted, 2);
    assert_eq!(summary.stats.skipped(), 1);
    assert_eq!(TestFixtures::new(&pool).member_count().await.expect("count"), 2);

    test_db.close().await.expect("failed to stop test database");
}

#[tokio::test]
async fn upload_stores_file_and_queues_job() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let upload = tempfile::tempdir().expect("tempdir");

    let config = AppConfig {
        import: ImportConfig::new(upload.path(), 1000),
        jobs: job_config(),
        max_upload_bytes: 1024 * 1024,
        slow_request: Duration::from_secs(5),
    };

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .manage_config(config)
        .mount_api_routes(routes![upload_members])
        .async_client()
        .await;

    let response = client
        .post("/api/v1/imports")
        .header(ContentType::CSV)
        .body(members_csv(5))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let queued: ImportQueuedResponse = response.into_json().await.expect("queued payload");
    assert!(upload.path().join(&queued.file).exists());

    let record = JobQueue::new(pool.clone())
        .get_job(queued.job_id)
        .await
        .expect("lookup")
        .expect("job exists");
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.payload["file"], queued.file);

    drop(client);
    test_db.close().await.expect("failed to stop test database");
}
