//! Per-kind buffering of entities with chunked bulk inserts.
//!
//! [`BulkCreateManager`] keeps one queue per [`Entity::KIND`]. A queue is
//! flushed through the matching [`BulkSink`] as soon as it holds
//! `chunk_size` entities. Whatever is left below the threshold stays
//! buffered until the producer calls [`BulkCreateManager::done`]; skipping
//! that call drops the final partial batch.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{ImportError, RowError};
use super::row::FilteredRow;

/// Chunk size used when a caller has no better number.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// A record type that can be built from a filtered CSV row and bulk stored.
pub trait Entity: Send + Sized + 'static {
    /// Stable key the accumulator groups this type under.
    const KIND: &'static str;
    /// Storage fields a CSV column may populate.
    const FIELDS: &'static [&'static str];

    fn from_row(row: &FilteredRow) -> Result<Self, RowError>;
}

/// Bulk persistence for one entity type.
///
/// Implementations write the whole batch in a single operation and skip rows
/// that violate a uniqueness constraint instead of failing. The returned
/// count is the number of rows actually written.
#[rocket::async_trait]
pub trait BulkSink<E: Send + 'static>: Send + Sync {
    async fn insert_ignore_conflicts(&self, batch: Vec<E>) -> Result<u64, ImportError>;
}

#[rocket::async_trait]
impl<E, T> BulkSink<E> for Arc<T>
where
    E: Send + 'static,
    T: BulkSink<E> + ?Sized,
{
    async fn insert_ignore_conflicts(&self, batch: Vec<E>) -> Result<u64, ImportError> {
        (**self).insert_ignore_conflicts(batch).await
    }
}

/// Running totals across every commit an accumulator has issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub commits: usize,
    pub submitted: usize,
    pub inserted: u64,
}

impl CommitStats {
    /// Rows handed to storage but dropped as duplicates.
    pub fn skipped(&self) -> u64 {
        (self.submitted as u64).saturating_sub(self.inserted)
    }

    pub fn merge(&mut self, other: &CommitStats) {
        self.commits += other.commits;
        self.submitted += other.submitted;
        self.inserted += other.inserted;
    }
}

#[rocket::async_trait]
trait PendingQueue<S>: Send {
    fn len(&self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    async fn commit(&mut self, sink: &S) -> Result<u64, ImportError>;
}

struct Queue<E> {
    items: Vec<E>,
}

impl<E> Default for Queue<E> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[rocket::async_trait]
impl<S, E> PendingQueue<S> for Queue<E>
where
    E: Entity,
    S: BulkSink<E> + 'static,
{
    fn len(&self) -> usize {
        self.items.len()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    async fn commit(&mut self, sink: &S) -> Result<u64, ImportError> {
        let batch = std::mem::take(&mut self.items);
        sink.insert_ignore_conflicts(batch).await
    }
}

/// Buffers entities per kind and bulk inserts them in chunks.
pub struct BulkCreateManager<S> {
    sink: S,
    chunk_size: usize,
    queues: BTreeMap<&'static str, Box<dyn PendingQueue<S>>>,
    stats: CommitStats,
}

impl<S> BulkCreateManager<S>
where
    S: Send + Sync + 'static,
{
    /// Create an empty accumulator. A `chunk_size` of zero is treated as one.
    pub fn new(sink: S, chunk_size: usize) -> Self {
        Self {
            sink,
            chunk_size: chunk_size.max(1),
            queues: BTreeMap::new(),
            stats: CommitStats::default(),
        }
    }

    pub fn with_default_chunk_size(sink: S) -> Self {
        Self::new(sink, DEFAULT_CHUNK_SIZE)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> &CommitStats {
        &self.stats
    }

    /// Number of entities of `kind` buffered and not yet committed.
    pub fn pending(&self, kind: &str) -> usize {
        self.queues.get(kind).map(|queue| queue.len()).unwrap_or(0)
    }

    /// Queue `entity`, committing its kind's buffer once it is full.
    pub async fn add<E>(&mut self, entity: E) -> Result<(), ImportError>
    where
        E: Entity,
        S: BulkSink<E>,
    {
        let queue = self
            .queues
            .entry(E::KIND)
            .or_insert_with(|| Box::new(Queue::<E>::default()) as Box<dyn PendingQueue<S>>);

        let queue = queue
            .as_any_mut()
            .downcast_mut::<Queue<E>>()
            .ok_or(ImportError::KindCollision(E::KIND))?;

        queue.items.push(entity);

        if queue.items.len() >= self.chunk_size {
            self.commit(E::KIND).await?;
        }

        Ok(())
    }

    async fn commit(&mut self, kind: &'static str) -> Result<(), ImportError> {
        let Some(queue) = self.queues.get_mut(kind) else {
            return Ok(());
        };

        let submitted = queue.len();
        if submitted == 0 {
            return Ok(());
        }

        let inserted = queue.commit(&self.sink).await?;

        self.stats.commits += 1;
        self.stats.submitted += submitted;
        self.stats.inserted += inserted;

        let skipped = (submitted as u64).saturating_sub(inserted);
        if skipped > 0 {
            log::debug!(
                "bulk create {}: {} of {} rows skipped as duplicates",
                kind,
                skipped,
                submitted
            );
        }
        log::trace!("bulk create {}: committed {} rows", kind, inserted);

        Ok(())
    }

    /// Commit every kind that still has buffered entities.
    ///
    /// Producers must call this once after their last [`add`](Self::add).
    pub async fn done(&mut self) -> Result<CommitStats, ImportError> {
        let kinds: Vec<&'static str> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.len() > 0)
            .map(|(kind, _)| *kind)
            .collect();

        for kind in kinds {
            self.commit(kind).await?;
        }

        Ok(self.stats.clone())
    }
}
