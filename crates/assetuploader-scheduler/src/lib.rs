//! Deferred job execution for assetuploader.
//!
//! This crate provides the pieces used to confirm asset uploads after their
//! signed URLs expire:
//! - [`Job`]: an immutable unit of work with a fixed execution date
//! - [`JobStore`]: an in-memory, time-bucketed store owned by a single task
//! - [`ImmediateScheduler`] and [`PeriodicScheduler`]: run jobs now, or on
//!   every tick of a timer with recovery of abandoned executions
//!
//! Execution is at-least-once. Callbacks must be idempotent.

mod bucket;
mod error;
mod job;
mod scheduler;
mod store;

pub use bucket::BucketGranularity;
pub use error::SchedulerError;
pub use job::{FnTask, Job, JobError, JobStatus, JobTask, task_fn};
pub use scheduler::{ImmediateScheduler, JobScheduler, PeriodicScheduler};
pub use store::{JobStore, JobStoreHandle, StoreStats, UPSERT_QUEUE_CAPACITY};
