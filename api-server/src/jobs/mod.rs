//! Background job queue and the dispatcher that drains it.
//!
//! Jobs live in the `jobs` table and are claimed with `FOR UPDATE SKIP
//! LOCKED`, so any number of server processes can run a dispatcher against
//! the same database. A job that fails is requeued until it runs out of
//! attempts. Running jobs send heartbeats; one whose heartbeat goes stale
//! (its worker died) is requeued by the next dispatcher poll, which gives
//! at-least-once execution.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::ImportDispatcher;
pub use queue::{FailureOutcome, ImportPayload, Job, JobQueue, JobRecord, JobStatus, JobType};
