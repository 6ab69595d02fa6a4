//! CSV member import.
//!
//! Files land under the upload directory, a `member_import` job is queued,
//! and the dispatcher hands the file reference to [`load_data`]:
//!
//! 1. **Row filtering** (`row`) - drops columns the target entity does not
//!    know about, and always drops `id`
//! 2. **Accumulation** (`accumulator`) - buffers entities per kind and
//!    flushes each kind once its buffer reaches the chunk size
//! 3. **Storage** (`store`) - one `UNNEST` insert per flush with conflicting
//!    rows skipped
//! 4. **Pipeline** (`pipeline`) - read, filter, accumulate, final drain, then
//!    delete the source file
//!
//! A failure anywhere in the pass aborts the job. Batches committed before
//! the failure stay in the database and the source file is left in place.
//!
//! ```rust,ignore
//! use crate::import::{load_data, PgMemberStore};
//! use crate::models::NewMember;
//!
//! let summary = load_data::<NewMember, _>(&config, "upload/members.csv", PgMemberStore::new(pool)).await?;
//! log::info!("{} rows, {} inserted", summary.rows, summary.stats.inserted);
//! ```

pub mod accumulator;
pub mod error;
pub mod pipeline;
pub mod row;
pub mod store;

pub use accumulator::{BulkCreateManager, BulkSink, CommitStats, DEFAULT_CHUNK_SIZE, Entity};
pub use error::{ImportError, RowError};
pub use pipeline::{ImportSummary, load_data, resolve_source};
pub use row::{FilteredRow, filter_row};
pub use store::PgMemberStore;

/// Chunk size used for member imports unless configured otherwise.
pub const DEFAULT_IMPORT_CHUNK_SIZE: usize = 1000;
