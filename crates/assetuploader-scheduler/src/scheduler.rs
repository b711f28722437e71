//! Job scheduler implementations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Job, JobStoreHandle, SchedulerError};

/// Minimum interval between scheduler ticks.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Maximum interval between scheduler ticks.
const MAX_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Something that accepts jobs for execution.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Hand a job over for execution.
    ///
    /// Errors report that the job could not be registered (or, for the
    /// immediate scheduler, that it could not run).
    async fn schedule(&self, job: Job, cancel: &CancellationToken) -> Result<(), SchedulerError>;
}

/// Scheduler that runs a job inline, refusing to run it early.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobScheduler for ImmediateScheduler {
    #[tracing::instrument(skip_all, fields(job_id = %job.id()))]
    async fn schedule(&self, job: Job, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        if Utc::now() < job.execution_date() {
            return Err(SchedulerError::Conflict {
                id: job.id().to_string(),
                execution_date: job.execution_date(),
            });
        }

        job.task()
            .run()
            .await
            .map_err(|source| SchedulerError::JobFailed {
                id: job.id().to_string(),
                source,
            })
    }
}

/// Scheduler that registers jobs in a [`JobStore`](crate::JobStore) and runs
/// due jobs on every tick of a timer.
///
/// Each tick selects jobs that are new, or that have been executing for more
/// than two ticks past their execution date, and runs them one after another.
/// Ticks never overlap: a slow tick delays the next one.
pub struct PeriodicScheduler {
    store: JobStoreHandle,
    tick_interval: Duration,
    shutdown: CancellationToken,
    tick_loop: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicScheduler {
    /// Start a scheduler over `store`, ticking every `tick_interval`.
    ///
    /// The first tick fires one interval after start.
    pub fn start(store: JobStoreHandle, tick_interval: Duration) -> Self {
        let tick_interval = tick_interval.clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL);
        let shutdown = CancellationToken::new();

        let ticks = TickLoop {
            store: store.clone(),
            tick_interval,
            overdue_tick: chrono::Duration::from_std(tick_interval).unwrap_or_default(),
            shutdown: shutdown.clone(),
        };
        let tick_loop = tokio::spawn(ticks.run());

        info!(tick_interval_ms = tick_interval.as_millis() as u64, "scheduler started");

        Self {
            store,
            tick_interval,
            shutdown,
            tick_loop: Mutex::new(Some(tick_loop)),
        }
    }

    /// The store this scheduler registers jobs in.
    pub fn store(&self) -> &JobStoreHandle {
        &self.store
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Check if the tick loop is still running.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop the tick loop and wait for it to finish.
    ///
    /// A job already executing runs to completion and its result is recorded;
    /// no further job is started. The store is left running.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.tick_loop.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler tick loop panicked");
            }
        }
    }
}

#[async_trait]
impl JobScheduler for PeriodicScheduler {
    #[tracing::instrument(skip_all, fields(job_id = %job.id()))]
    async fn schedule(&self, job: Job, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        debug!(execution_date = %job.execution_date(), "registering job");
        self.store.upsert(job, cancel).await
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// State owned by the background tick task.
struct TickLoop {
    store: JobStoreHandle,
    tick_interval: Duration,
    overdue_tick: chrono::Duration,
    shutdown: CancellationToken,
}

impl TickLoop {
    async fn run(self) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.tick_interval,
            self.tick_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.execute_due_jobs().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "tick finished"),
                Err(SchedulerError::Cancelled) => break,
                Err(e) => error!(error = %e, "failed to query due jobs"),
            }
        }

        info!("scheduler shut down gracefully");
    }

    /// Run every due job once, sequentially. Returns how many were run.
    async fn execute_due_jobs(&self) -> Result<usize, SchedulerError> {
        // Queries may overtake upserts; make the previous tick's writes visible
        // so finished jobs are not mistaken for abandoned ones.
        self.store.sync(&self.shutdown).await?;

        let now = Utc::now();
        let overdue_tick = self.overdue_tick;
        let due = self
            .store
            .query(
                now,
                move |job| job.is_new() || job.is_overdue(now, overdue_tick),
                &self.shutdown,
            )
            .await?;

        let mut executed = 0;
        for job in due {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested, not starting new jobs");
                break;
            }
            self.execute_job(job).await;
            executed += 1;
        }

        Ok(executed)
    }

    /// Execute a single job, writing each status transition back to the store.
    ///
    /// Callback failures are recorded on the job, never returned.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id()))]
    async fn execute_job(&self, job: Job) {
        if job.is_executing() {
            warn!(execution_date = %job.execution_date(), "re-dispatching overdue job");
        }

        let executing = job.executing();
        if let Err(e) = self.store.upsert(executing.clone(), &self.shutdown).await {
            error!(error = %e, "failed to mark job as executing");
        }

        let finished = match executing.task().run().await {
            Ok(()) => {
                info!("job completed");
                executing.completed()
            }
            Err(err) => {
                warn!(error = %err, "job failed");
                executing.error(&err)
            }
        };

        // The callback already ran; its outcome is recorded even during stop
        if let Err(e) = self.store.upsert(finished, &CancellationToken::new()).await {
            error!(error = %e, "failed to record job result");
        }
    }
}
