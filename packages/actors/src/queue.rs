//! Durable job queue: handle, configuration and errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use db::{DbError, Store};
use ractor::{Actor, ActorRef, RpcReplyPort};
use roam_core::{Job, JobId, JobPayload, LeaseStatus, Outcome, SubmissionError};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::bus::{BusError, EventBus};
use crate::messages::QueueMessage;
use crate::queue_actor::{QueueActor, QueueArgs};

pub use roam_core::CancelAck;

/// Floor for lease TTLs, sweep and heartbeat periods and lease waits.
///
/// Shorter settings, zero included, are raised to it.
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a lease lasts without renewal.
    pub lease_ttl: Duration,
    /// How often expired leases are reclaimed.
    pub sweep_interval: Duration,
    /// Lease acquisitions allowed before an expired job is failed.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

impl QueueConfig {
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl.max(MIN_PERIOD);
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval.max(MIN_PERIOD);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Errors from queue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The store or the queue actor could not serve the request; retry allowed.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The caller does not hold an unexpired lease on the job.
    #[error("lease on job {job_id} is not held by {worker_id}")]
    LeaseLost { job_id: JobId, worker_id: String },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("malformed payload: {0}")]
    Submission(String),
}

impl From<DbError> for QueueError {
    fn from(e: DbError) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

impl From<BusError> for QueueError {
    fn from(e: BusError) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

impl From<SubmissionError> for QueueError {
    fn from(e: SubmissionError) -> Self {
        QueueError::Submission(e.0)
    }
}

/// Handle to the queue actor.
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct JobQueue {
    actor: ActorRef<QueueMessage>,
    notify: Arc<Notify>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl JobQueue {
    /// Start the queue actor, reloading unfinished jobs from `store`.
    pub async fn start(store: Store, bus: EventBus, config: QueueConfig) -> Result<Self, QueueError> {
        let notify = Arc::new(Notify::new());
        let args = QueueArgs {
            config,
            store,
            bus,
            notify: notify.clone(),
        };

        let (actor, handle) = Actor::spawn(None, QueueActor, args)
            .await
            .map_err(|e| QueueError::Unavailable(format!("failed to start queue actor: {}", e)))?;

        Ok(Self {
            actor,
            notify,
            handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Submit a call; returns once the job is durably queued.
    pub async fn submit(&self, payload: JobPayload) -> Result<JobId, QueueError> {
        let job = self
            .request(|reply| QueueMessage::Submit {
                payload: Box::new(payload),
                reply,
            })
            .await?;
        Ok(job.id)
    }

    /// Lease a job, waiting up to `timeout` for one to become available.
    pub async fn lease(&self, worker_id: &str, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before asking so a submit in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_lease(worker_id).await? {
                return Ok(Some(job));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Lease a job if one is available right now.
    pub async fn try_lease(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        self.request(|reply| QueueMessage::Lease {
            worker_id: worker_id.to_string(),
            reply,
        })
        .await
    }

    /// Extend the lease `worker_id` holds on `job_id`.
    pub async fn renew(&self, job_id: JobId, worker_id: &str) -> Result<LeaseStatus, QueueError> {
        self.request(|reply| QueueMessage::Renew {
            job_id,
            worker_id: worker_id.to_string(),
            reply,
        })
        .await
    }

    /// Record the outcome of a leased job.
    ///
    /// Appends the terminal event and stores the terminal status.
    pub async fn complete(
        &self,
        job_id: JobId,
        worker_id: &str,
        outcome: Outcome,
    ) -> Result<Job, QueueError> {
        self.request(|reply| QueueMessage::Complete {
            job_id,
            worker_id: worker_id.to_string(),
            outcome,
            reply,
        })
        .await
    }

    /// Cancel a queued job, or request cancellation of a running one.
    pub async fn cancel(&self, job_id: JobId, reason: Option<String>) -> Result<CancelAck, QueueError> {
        self.request(|reply| QueueMessage::Cancel {
            job_id,
            reason,
            reply,
        })
        .await
    }

    /// Get a job by ID, finished or not.
    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        self.request(|reply| QueueMessage::GetJob { job_id, reply })
            .await
    }

    /// Job counts per status.
    pub async fn stats(&self) -> Result<HashMap<String, u64>, QueueError> {
        self.request(|reply| QueueMessage::Stats { reply }).await
    }

    /// Stop the queue actor and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.actor.send_message(QueueMessage::Shutdown);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        // Wake blocked lease calls so they observe the stopped actor.
        self.notify.notify_waiters();
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<Result<T, QueueError>>) -> QueueMessage,
    ) -> Result<T, QueueError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(build(tx.into()))
            .map_err(|_| QueueError::Unavailable("queue actor is not running".into()))?;
        rx.await
            .map_err(|_| QueueError::Unavailable("queue actor dropped the request".into()))?
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("actor", &self.actor.get_id())
            .finish()
    }
}
