//! Environment-driven configuration for uploads, imports and the job runner.
//!
//! Server and database settings stay with Rocket's figment (`Rocket.toml`,
//! `ROCKET_*`); everything the import path needs is read here.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::import::DEFAULT_IMPORT_CHUNK_SIZE;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

/// Settings consumed by the import pipeline.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Base directory that job file references are resolved against.
    pub base_dir: PathBuf,
    /// Maximum number of entities of one kind buffered before a flush.
    pub chunk_size: usize,
}

impl ImportConfig {
    pub fn new(base_dir: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            chunk_size,
        }
    }

    pub fn from_env() -> Self {
        Self {
            base_dir: env_path("MEMBER_UPLOAD_DIR", "./upload"),
            chunk_size: env_usize("MEMBER_IMPORT_CHUNK_SIZE", DEFAULT_IMPORT_CHUNK_SIZE),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Settings for the background job dispatcher.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Spawn the dispatcher inside the API process.
    pub run_dispatcher: bool,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub max_attempts: i32,
    /// A running job without a heartbeat for this long is requeued.
    pub stale_after: Duration,
}

impl JobConfig {
    pub fn from_env() -> Self {
        Self {
            run_dispatcher: env_bool("MEMBER_RUN_DISPATCHER", true),
            poll_interval: env_duration_millis("MEMBER_JOB_POLL_INTERVAL_MS", 5_000),
            error_backoff: env_duration_millis("MEMBER_JOB_ERROR_BACKOFF_MS", 10_000),
            max_attempts: env_i32("MEMBER_JOB_MAX_ATTEMPTS", 3).max(1),
            stale_after: env_duration_millis("MEMBER_JOB_STALE_AFTER_MS", 300_000),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Top-level application configuration managed as Rocket state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub import: ImportConfig,
    pub jobs: JobConfig,
    /// Upper bound for a single uploaded CSV body.
    pub max_upload_bytes: usize,
    /// Requests slower than this are logged at `warn`.
    pub slow_request: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            import: ImportConfig::from_env(),
            jobs: JobConfig::from_env(),
            max_upload_bytes: env_usize("MEMBER_IMPORT_MAX_UPLOAD_BYTES", 16 * 1024 * 1024),
            slow_request: env_duration_millis("MEMBER_SLOW_REQUEST_MS", 1_000),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
