use rocket_db_pools::sqlx;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn one filtered CSV row into an entity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidField {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors that abort an import job.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file reference '{0}' escapes the upload directory")]
    InvalidPath(String),
    #[error("source file not found: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source file is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: RowError,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("entity kind '{0}' is already buffered with a different type")]
    KindCollision(&'static str),
}
