use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use member_api::config::{ImportConfig, JobConfig};
use member_api::import::{PgMemberStore, load_data, resolve_source};
use member_api::jobs::JobQueue;
use member_api::models::NewMember;

#[derive(Parser, Debug)]
#[command(
    name = "enqueue_import",
    about = "Queue (or run) a member CSV import for a file in the upload directory"
)]
struct Args {
    /// File reference relative to the upload directory, e.g. `batch/members.csv`.
    file: String,

    /// Import immediately in this process instead of queueing a job.
    #[arg(long)]
    run_now: bool,

    /// Override `MEMBER_UPLOAD_DIR`.
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Override `MEMBER_IMPORT_CHUNK_SIZE` when running immediately.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Queue priority; higher runs first.
    #[arg(long, default_value_t = 0)]
    priority: i32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let mut import_config = ImportConfig::from_env();
    if let Some(dir) = args.upload_dir {
        import_config.base_dir = dir;
    }
    if let Some(chunk_size) = args.chunk_size {
        import_config.chunk_size = chunk_size;
    }

    let path = match resolve_source(&import_config.base_dir, &args.file) {
        Ok(path) => path,
        Err(err) => {
            writeln!(io::stderr(), "error: {err}")?;
            std::process::exit(1);
        }
    };

    if !path.exists() {
        writeln!(io::stderr(), "error: {} does not exist", path.display())?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    if args.run_now {
        let summary =
            load_data::<NewMember, _>(&import_config, &args.file, PgMemberStore::new(pool)).await?;
        println!(
            "Imported {} rows from {} ({} inserted, {} duplicates skipped)",
            summary.rows,
            summary.file.display(),
            summary.stats.inserted,
            summary.stats.skipped()
        );
        return Ok(());
    }

    let queue = JobQueue::new(pool).with_max_attempts(JobConfig::from_env().max_attempts);
    let job_id = queue
        .enqueue_import_with_priority(&args.file, args.priority)
        .await?;

    println!("Queued import job {job_id} for '{}'", args.file);
    Ok(())
}
