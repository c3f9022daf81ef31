//! Per-job progress events and terminal outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{ExecutionError, JobId, JobStatus};

/// The kind of a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A worker leased the job and is about to execute it.
    Started,
    /// Incremental output emitted by the callable.
    Output,
    /// The lease holder is still alive.
    Heartbeat,
    Succeeded,
    Failed,
    Cancelled,
}

impl EventKind {
    /// Check if this kind ends the job's event log.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Succeeded | EventKind::Failed | EventKind::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Output => "output",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Succeeded => "succeeded",
            EventKind::Failed => "failed",
            EventKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only record of job progress, attached to exactly one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub job_id: JobId,
    /// Position in the job's log, contiguous from 0.
    pub sequence: u64,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(job_id: JobId, sequence: u64, kind: EventKind, payload: Value) -> Self {
        Self {
            job_id,
            sequence,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Decode the outcome carried by a terminal event.
    ///
    /// Returns `None` for non-terminal events.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.kind {
            EventKind::Succeeded => Some(Outcome::Succeeded(
                self.payload.get("value").cloned().unwrap_or(Value::Null),
            )),
            EventKind::Failed => {
                let field = |name: &str| {
                    self.payload
                        .get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                Some(Outcome::Failed(ExecutionError::new(
                    field("kind").unwrap_or_else(|| "Error".to_string()),
                    field("message").unwrap_or_default(),
                )))
            }
            EventKind::Cancelled => Some(Outcome::Cancelled(
                self.payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            )),
            _ => None,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The callable returned this value.
    Succeeded(Value),
    Failed(ExecutionError),
    Cancelled(Option<String>),
}

impl Outcome {
    /// The terminal event kind recording this outcome.
    pub fn kind(&self) -> EventKind {
        match self {
            Outcome::Succeeded(_) => EventKind::Succeeded,
            Outcome::Failed(_) => EventKind::Failed,
            Outcome::Cancelled(_) => EventKind::Cancelled,
        }
    }

    /// The terminal job status matching this outcome.
    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Succeeded(_) => JobStatus::Succeeded,
            Outcome::Failed(_) => JobStatus::Failed,
            Outcome::Cancelled(_) => JobStatus::Cancelled,
        }
    }

    /// The payload of the terminal event.
    pub fn to_payload(&self) -> Value {
        match self {
            Outcome::Succeeded(value) => json!({ "value": value }),
            Outcome::Failed(error) => json!({ "kind": error.kind, "message": error.message }),
            Outcome::Cancelled(reason) => json!({ "reason": reason }),
        }
    }
}
