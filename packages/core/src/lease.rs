//! Leases: time-bounded exclusive claims on a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// A worker's claim on a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: String,
    pub job_id: JobId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(worker_id: impl Into<String>, job_id: JobId, expires_at: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.into(),
            job_id,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What a successful renewal tells the lease holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStatus {
    pub expires_at: DateTime<Utc>,
    /// A cancel request arrived; stop at this step boundary.
    pub cancel_requested: bool,
}
