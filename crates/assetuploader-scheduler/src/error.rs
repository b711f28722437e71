//! Error types for the job store and schedulers.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::JobError;

/// Errors that can occur in store and scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job was asked to run before its execution date.
    #[error("job {id} cannot run before {execution_date}")]
    Conflict {
        id: String,
        execution_date: DateTime<Utc>,
    },

    /// The caller's cancellation fired while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// The store loop is not accepting or answering requests.
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    /// The job callback returned a failure.
    #[error("job {id} failed: {source}")]
    JobFailed {
        id: String,
        #[source]
        source: JobError,
    },
}
