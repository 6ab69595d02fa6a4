//! One CSV file's ingestion, run as a unit of background work.

use std::io;
use std::path::{Component, Path, PathBuf};

use super::accumulator::{BulkCreateManager, BulkSink, CommitStats, Entity};
use super::error::ImportError;
use super::row::filter_row;
use crate::config::ImportConfig;

/// Outcome of a completed import.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    /// Absolute path of the file that was consumed (and removed).
    pub file: PathBuf,
    /// Data rows read from the file.
    pub rows: usize,
    pub stats: CommitStats,
}

/// Resolve a file reference against the upload base directory.
///
/// References must be relative and may not climb out of `base_dir`.
pub fn resolve_source(base_dir: &Path, fragment: &str) -> Result<PathBuf, ImportError> {
    let relative = Path::new(fragment);
    let escapes = relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));

    if fragment.trim().is_empty() || relative.is_absolute() || escapes {
        return Err(ImportError::InvalidPath(fragment.to_string()));
    }

    Ok(base_dir.join(relative))
}

/// Import every row of `file` as an `E`, then delete the file.
///
/// Rows are filtered down to `E::FIELDS` (never `id`) and written through
/// `sink` in chunks of `config.chunk_size`. The first row that cannot be
/// built aborts the import: earlier chunks remain committed and the file is
/// kept. The file is removed only after the final drain succeeds.
pub async fn load_data<E, S>(
    config: &ImportConfig,
    file: &str,
    sink: S,
) -> Result<ImportSummary, ImportError>
where
    E: Entity,
    S: BulkSink<E> + 'static,
{
    let path = resolve_source(&config.base_dir, file)?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ImportError::SourceMissing(path));
        }
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8(bytes)?;

    log::info!(
        "import {}: reading {} as {} (chunk size {})",
        file,
        path.display(),
        E::KIND,
        config.chunk_size
    );

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    let mut manager = BulkCreateManager::new(sink, config.chunk_size);
    let mut rows = 0usize;

    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);

        let filtered = filter_row(&headers, &record, E::FIELDS);
        let entity =
            E::from_row(&filtered).map_err(|source| ImportError::Row { line, source })?;

        manager.add(entity).await?;
        rows += 1;
    }

    let stats = manager.done().await?;

    tokio::fs::remove_file(&path).await?;

    log::info!(
        "import {}: {} rows, {} inserted, {} duplicates skipped in {} commits",
        file,
        rows,
        stats.inserted,
        stats.skipped(),
        stats.commits
    );

    Ok(ImportSummary {
        file: path,
        rows,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::accumulator::tests::{RecordingSink, Widget};
    use crate::import::error::RowError;
    use crate::import::row::FilteredRow;
    use std::fmt::Write as _;
    use std::sync::{Arc, Mutex};

    fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write csv");
        path
    }

    fn widget_csv(rows: u32) -> String {
        let mut csv = String::from("value,comment\n");
        for value in 0..rows {
            writeln!(csv, "{value},row {value}").unwrap();
        }
        csv
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Contact {
        name: String,
        email: String,
        columns: Vec<String>,
    }

    impl Entity for Contact {
        const KIND: &'static str = "test.Contact";
        const FIELDS: &'static [&'static str] = &["id", "name", "email"];

        fn from_row(row: &FilteredRow) -> Result<Self, RowError> {
            let mut columns: Vec<String> = row.columns().map(str::to_string).collect();
            columns.sort();
            Ok(Contact {
                name: row.required("name")?.to_string(),
                email: row.required("email")?.to_string(),
                columns,
            })
        }
    }

    #[derive(Default)]
    struct ContactSink {
        stored: Mutex<Vec<Contact>>,
    }

    #[rocket::async_trait]
    impl BulkSink<Contact> for ContactSink {
        async fn insert_ignore_conflicts(&self, batch: Vec<Contact>) -> Result<u64, ImportError> {
            let count = batch.len() as u64;
            self.stored.lock().unwrap().extend(batch);
            Ok(count)
        }
    }

    #[tokio::test]
    async fn imports_in_chunks_and_removes_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(dir.path(), "members.csv", &widget_csv(2500));
        let config = ImportConfig::new(dir.path(), 1000);
        let sink = Arc::new(RecordingSink::default());

        let summary = load_data::<Widget, _>(&config, "members.csv", sink.clone())
            .await
            .expect("import succeeds");

        let sizes: Vec<usize> = sink
            .batches_of(Widget::KIND)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(summary.rows, 2500);
        assert_eq!(summary.stats.commits, 3);
        assert!(!path.exists(), "source file should be deleted");
    }

    #[tokio::test]
    async fn extra_columns_and_identifier_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_csv(
            dir.path(),
            "contacts.csv",
            "id,name,email,extra_column\n1,Ada,ada@example.com,x\n2,Grace,grace@example.com,y\n",
        );
        let config = ImportConfig::new(dir.path(), 1000);
        let sink = Arc::new(ContactSink::default());

        load_data::<Contact, _>(&config, "contacts.csv", sink.clone())
            .await
            .expect("import succeeds");

        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.len(), 2);
        for contact in stored.iter() {
            assert_eq!(contact.columns, vec!["email".to_string(), "name".to_string()]);
        }
        assert_eq!(stored[0].name, "Ada");
        assert_eq!(stored[1].email, "grace@example.com");
    }

    #[tokio::test]
    async fn invalid_row_aborts_and_keeps_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(dir.path(), "bad.csv", "value\n1\n2\n3\nnot-a-number\n5\n");
        let config = ImportConfig::new(dir.path(), 2);
        let sink = Arc::new(RecordingSink::default());

        let err = load_data::<Widget, _>(&config, "bad.csv", sink.clone())
            .await
            .expect_err("bad row fails the job");

        assert!(matches!(err, ImportError::Row { line: 5, .. }), "got {err:?}");
        assert!(path.exists(), "source file must survive a failed import");
        // The first full chunk was already committed; the buffered row was not.
        assert_eq!(sink.batches_of(Widget::KIND), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn missing_required_column_aborts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(dir.path(), "no_value.csv", "comment\nhello\n");
        let config = ImportConfig::new(dir.path(), 10);
        let sink = Arc::new(RecordingSink::default());

        let err = load_data::<Widget, _>(&config, "no_value.csv", sink.clone())
            .await
            .expect_err("missing column fails");

        assert!(matches!(
            err,
            ImportError::Row { source: RowError::MissingField(ref f), .. } if f == "value"
        ));
        assert!(path.exists());
        assert_eq!(sink.commit_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_fails_before_accumulating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ImportConfig::new(dir.path(), 10);
        let sink = Arc::new(RecordingSink::default());

        let err = load_data::<Widget, _>(&config, "absent.csv", sink.clone())
            .await
            .expect_err("missing file fails");

        assert!(matches!(err, ImportError::SourceMissing(_)));
        assert_eq!(sink.commit_count(), 0);
    }

    #[tokio::test]
    async fn header_only_file_is_still_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_csv(dir.path(), "empty.csv", "value,comment\n");
        let config = ImportConfig::new(dir.path(), 10);
        let sink = Arc::new(RecordingSink::default());

        let summary = load_data::<Widget, _>(&config, "empty.csv", sink.clone())
            .await
            .expect("empty import succeeds");

        assert_eq!(summary.rows, 0);
        assert_eq!(sink.commit_count(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn non_utf8_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("latin1.csv");
        std::fs::write(&path, b"value\n\xff\xfe\n").unwrap();
        let config = ImportConfig::new(dir.path(), 10);

        let err = load_data::<Widget, _>(&config, "latin1.csv", Arc::new(RecordingSink::default()))
            .await
            .expect_err("invalid utf-8");

        assert!(matches!(err, ImportError::Encoding(_)));
        assert!(path.exists());
    }

    #[test]
    fn resolve_rejects_escaping_references() {
        let base = Path::new("/srv/upload");

        assert_eq!(
            resolve_source(base, "batch/members.csv").unwrap(),
            PathBuf::from("/srv/upload/batch/members.csv")
        );
        for bad in ["../secrets.csv", "/etc/passwd", "a/../../b.csv", ""] {
            assert!(
                matches!(resolve_source(base, bad), Err(ImportError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
