//! JSON bodies exchanged between the controller and its clients.

use serde::{Deserialize, Serialize};

use crate::JobId;

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// The job was still queued and is now cancelled.
    Cancelled,
    /// The job is running; its lease holder will stop at the next step boundary.
    Requested,
    /// The job had already finished; nothing changed.
    AlreadyFinished,
}

/// Body of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Body of a cancel acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub status: CancelAck,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
