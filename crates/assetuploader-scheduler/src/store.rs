//! JobStore actor owning the time-bucketed job set.
//!
//! All mutation goes through a single task, so the bucket index needs no
//! locking. Upserts and queries travel on separate queues and the loop
//! picks between them without bias: a query may overtake upserts that were
//! submitted before it. Callers that need to observe their own writes call
//! [`JobStoreHandle::sync`] first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::bucket::{BucketGranularity, Buckets};
use crate::{Job, SchedulerError};

/// Capacity of the upsert queue. Writers wait once it is full.
pub const UPSERT_QUEUE_CAPACITY: usize = 1000;

/// Capacity of the query queue.
const QUERY_QUEUE_CAPACITY: usize = 1000;

type JobPredicate = Box<dyn Fn(&Job) -> bool + Send>;

/// Operations on the write queue.
enum WriteOp {
    /// Insert or replace a job.
    Upsert(Job),
    /// Barrier: answered once every earlier write has been applied.
    Sync { response: oneshot::Sender<()> },
    /// Stop the store loop.
    Shutdown,
}

/// Operations on the read queue.
enum ReadOp {
    Query {
        before: DateTime<Utc>,
        predicate: JobPredicate,
        response: oneshot::Sender<Vec<Job>>,
    },
    Stats {
        response: oneshot::Sender<StoreStats>,
    },
}

/// Size of the store. Buckets are never evicted, so both numbers only grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub buckets: usize,
    pub jobs: usize,
}

/// The JobStore actor.
///
/// It exclusively owns the buckets and processes operations sequentially.
pub struct JobStore {
    buckets: Buckets,
    write_rx: mpsc::Receiver<WriteOp>,
    read_rx: mpsc::Receiver<ReadOp>,
}

impl JobStore {
    /// Create a new store with the given bucket granularity.
    ///
    /// Returns the store and a handle for sending operations.
    pub fn new(granularity: BucketGranularity) -> (Self, JobStoreHandle) {
        let (write_tx, write_rx) = mpsc::channel(UPSERT_QUEUE_CAPACITY);
        let (read_tx, read_rx) = mpsc::channel(QUERY_QUEUE_CAPACITY);
        let store = Self {
            buckets: Buckets::new(granularity),
            write_rx,
            read_rx,
        };
        let handle = JobStoreHandle { write_tx, read_tx };
        (store, handle)
    }

    /// Spawn the store loop as a background task.
    pub fn spawn(granularity: BucketGranularity) -> JobStoreHandle {
        let (store, handle) = Self::new(granularity);
        tokio::spawn(async move {
            store.run().await;
        });
        handle
    }

    /// Run the store loop until a shutdown is received or every handle is
    /// dropped.
    pub async fn run(mut self) {
        debug!("job store started");

        loop {
            tokio::select! {
                op = self.write_rx.recv() => match op {
                    Some(WriteOp::Upsert(job)) => self.apply_upsert(job),
                    Some(WriteOp::Sync { response }) => {
                        let _ = response.send(());
                    }
                    Some(WriteOp::Shutdown) => {
                        debug!("job store received shutdown");
                        break;
                    }
                    None => break,
                },
                op = self.read_rx.recv() => match op {
                    Some(op) => self.apply_read(op),
                    None => break,
                },
            }
        }

        debug!(
            buckets = self.buckets.bucket_count(),
            jobs = self.buckets.job_count(),
            "job store stopped"
        );
    }

    fn apply_upsert(&mut self, job: Job) {
        trace!(job_id = %job.id(), status = %job.status(), "upserting job");
        if self.buckets.upsert(job) {
            debug!(buckets = self.buckets.bucket_count(), "created time bucket");
        }
    }

    fn apply_read(&self, op: ReadOp) {
        match op {
            ReadOp::Query {
                before,
                predicate,
                response,
            } => {
                // The requester stopped waiting
                if response.is_closed() {
                    trace!("skipping abandoned query");
                    return;
                }
                let jobs = self.buckets.query(before, &*predicate);
                trace!(before = %before, found = jobs.len(), "processed query");
                let _ = response.send(jobs);
            }
            ReadOp::Stats { response } => {
                let _ = response.send(StoreStats {
                    buckets: self.buckets.bucket_count(),
                    jobs: self.buckets.job_count(),
                });
            }
        }
    }
}

/// Handle for sending operations to the JobStore.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct JobStoreHandle {
    write_tx: mpsc::Sender<WriteOp>,
    read_tx: mpsc::Sender<ReadOp>,
}

impl JobStoreHandle {
    /// Submit a job for insertion or replacement.
    ///
    /// Returns once the job is accepted on the queue, not once it is applied.
    /// Waits while the queue is full.
    pub async fn upsert(&self, job: Job, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        send_op(&self.write_tx, WriteOp::Upsert(job), cancel, "upsert").await
    }

    /// Jobs whose execution date falls in a bucket at or before the bucket
    /// of `before`, filtered by `predicate`. Order is unspecified.
    pub async fn query<P>(
        &self,
        before: DateTime<Utc>,
        predicate: P,
        cancel: &CancellationToken,
    ) -> Result<Vec<Job>, SchedulerError>
    where
        P: Fn(&Job) -> bool + Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let op = ReadOp::Query {
            before,
            predicate: Box::new(predicate),
            response: response_tx,
        };
        send_op(&self.read_tx, op, cancel, "query").await?;
        await_response(response_rx, cancel, "query").await
    }

    /// Wait until every upsert submitted through this store before the call
    /// has been applied.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        let op = WriteOp::Sync {
            response: response_tx,
        };
        send_op(&self.write_tx, op, cancel, "sync").await?;
        await_response(response_rx, cancel, "sync").await
    }

    /// Current number of buckets and jobs.
    pub async fn stats(&self, cancel: &CancellationToken) -> Result<StoreStats, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        let op = ReadOp::Stats {
            response: response_tx,
        };
        send_op(&self.read_tx, op, cancel, "stats").await?;
        await_response(response_rx, cancel, "stats").await
    }

    /// Shutdown the store.
    ///
    /// Upserts already queued are applied first. After this, every
    /// operation fails with [`SchedulerError::Unavailable`].
    pub async fn shutdown(&self) {
        if let Err(e) = self.write_tx.send(WriteOp::Shutdown).await {
            warn!(error = %e, "failed to send shutdown to job store");
        }
    }

    /// Check if the store loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.write_tx.is_closed()
    }
}

/// Enqueue an operation, giving up if the caller's token fires first.
async fn send_op<T>(
    tx: &mpsc::Sender<T>,
    op: T,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<(), SchedulerError> {
    if cancel.is_cancelled() {
        return Err(SchedulerError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SchedulerError::Cancelled),
        result = tx.send(op) => result.map_err(|_| {
            SchedulerError::Unavailable(format!("failed to send {} request", operation))
        }),
    }
}

/// Wait for the store's reply, giving up if the caller's token fires first.
async fn await_response<T>(
    rx: oneshot::Receiver<T>,
    cancel: &CancellationToken,
    operation: &str,
) -> Result<T, SchedulerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SchedulerError::Cancelled),
        result = rx => result.map_err(|_| {
            SchedulerError::Unavailable(format!("failed to receive {} response", operation))
        }),
    }
}
