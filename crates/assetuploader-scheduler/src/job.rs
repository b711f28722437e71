//! Job types.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Failure returned by a job callback.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// The unit of work carried by a job.
///
/// Implementations must be idempotent: a job left executing for too long is
/// re-dispatched, so `run` may be called more than once for the same job.
#[async_trait]
pub trait JobTask: Send + Sync {
    /// Execute the work.
    async fn run(&self) -> Result<(), JobError>;
}

/// Adapter turning an async closure into a [`JobTask`].
pub struct FnTask<F>(F);

/// Wrap a closure returning a future as a [`JobTask`].
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    FnTask(f)
}

#[async_trait]
impl<F, Fut> JobTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn run(&self) -> Result<(), JobError> {
        (self.0)().await
    }
}

/// Current status of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for its first execution.
    #[default]
    New,
    /// Job has been picked up by a scheduler tick.
    Executing,
    /// Job callback failed.
    Error,
    /// Job callback succeeded.
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Executing => "executing",
            JobStatus::Error => "error",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(JobStatus::New),
            "executing" => Ok(JobStatus::Executing),
            "error" => Ok(JobStatus::Error),
            "completed" => Ok(JobStatus::Completed),
            other => Err(format!(
                "invalid job status '{}', expected new/executing/error/completed",
                other
            )),
        }
    }
}

/// A job scheduled for a fixed date.
///
/// Identity (`id`, task and execution date) is fixed at construction.
/// Status transitions return a new value and leave the original untouched.
#[derive(Clone, Serialize)]
pub struct Job {
    id: String,
    #[serde(skip)]
    task: Arc<dyn JobTask>,
    status: JobStatus,
    status_message: String,
    execution_date: DateTime<Utc>,
}

impl Job {
    /// Create a new job that becomes eligible at `execution_date`.
    pub fn new_fixed_date<T>(id: impl Into<String>, task: T, execution_date: DateTime<Utc>) -> Self
    where
        T: JobTask + 'static,
    {
        Self {
            id: id.into(),
            task: Arc::new(task),
            status: JobStatus::New,
            status_message: "Job is new".to_string(),
            execution_date,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn execution_date(&self) -> DateTime<Utc> {
        self.execution_date
    }

    pub fn task(&self) -> &Arc<dyn JobTask> {
        &self.task
    }

    pub fn is_new(&self) -> bool {
        self.status == JobStatus::New
    }

    pub fn is_executing(&self) -> bool {
        self.status == JobStatus::Executing
    }

    pub fn is_error(&self) -> bool {
        self.status == JobStatus::Error
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Check if this job has been executing for longer than two ticks past
    /// its execution date, i.e. whoever picked it up is presumed gone.
    pub fn is_overdue(&self, now: DateTime<Utc>, tick_interval: Duration) -> bool {
        self.is_executing() && now > self.execution_date + tick_interval * 2
    }

    /// Copy of this job marked as executing.
    pub fn executing(&self) -> Job {
        self.with_status(JobStatus::Executing, "Job is being executed")
    }

    /// Copy of this job marked as completed.
    pub fn completed(&self) -> Job {
        self.with_status(JobStatus::Completed, "Job was completed successfully")
    }

    /// Copy of this job marked as failed, carrying the failure message.
    pub fn error(&self, err: &dyn fmt::Display) -> Job {
        self.with_status(JobStatus::Error, err.to_string())
    }

    fn with_status(&self, status: JobStatus, status_message: impl Into<String>) -> Job {
        Job {
            id: self.id.clone(),
            task: Arc::clone(&self.task),
            status,
            status_message: status_message.into(),
            execution_date: self.execution_date,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("status_message", &self.status_message)
            .field("execution_date", &self.execution_date)
            .finish_non_exhaustive()
    }
}
