//! Message types for actor communication.

use std::collections::HashMap;

use roam_core::{Job, JobId, JobPayload, LeaseStatus, Outcome};
use ractor::RpcReplyPort;

use crate::queue::{CancelAck, QueueError};

/// Reply port carrying a queue operation result.
pub type QueueReply<T> = RpcReplyPort<Result<T, QueueError>>;

/// Messages for the QueueActor.
///
/// The actor handles one message at a time, which makes it the single
/// place where job status and leases change.
#[derive(Debug)]
pub enum QueueMessage {
    /// Persist a new job and make it leasable.
    Submit {
        payload: Box<JobPayload>,
        reply: QueueReply<Job>,
    },

    /// Hand the oldest leasable job to a worker, if there is one.
    Lease {
        worker_id: String,
        reply: QueueReply<Option<Job>>,
    },

    /// Extend a held lease.
    Renew {
        job_id: JobId,
        worker_id: String,
        reply: QueueReply<LeaseStatus>,
    },

    /// Record the outcome of a leased job and release the lease.
    Complete {
        job_id: JobId,
        worker_id: String,
        outcome: Outcome,
        reply: QueueReply<Job>,
    },

    /// Cancel a job, or ask its lease holder to stop.
    Cancel {
        job_id: JobId,
        reason: Option<String>,
        reply: QueueReply<CancelAck>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: QueueReply<Option<Job>>,
    },

    /// Job counts per status, read from the store.
    Stats {
        reply: QueueReply<HashMap<String, u64>>,
    },

    /// Reclaim expired leases.
    Sweep,

    /// Shutdown the queue gracefully.
    Shutdown,
}

/// Messages for a WorkerActor slot.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Lease the next job and run it, then poll again.
    Poll,
}

/// Messages for the PoolSupervisor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Number of live worker slots.
    Slots { reply: RpcReplyPort<usize> },

    /// Stop every slot after its current job, then stop the pool.
    Drain,
}
