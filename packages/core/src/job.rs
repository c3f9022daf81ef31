//! Job domain types for remote calls waiting in, or leaving, the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::error::{ExecutionError, SubmissionError};
use crate::lease::Lease;

/// Longest accepted callable name.
pub const MAX_FUNCTION_NAME_LEN: usize = 128;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker to lease it.
    #[default]
    Queued,
    /// Leased by a worker and executing.
    Running,
    /// The callable returned normally.
    Succeeded,
    /// The callable raised, timed out, or ran out of attempts.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional and keyword arguments of a remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append a positional argument from any serializable value.
    pub fn try_arg<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.args.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Decode the positional argument at `index`.
    pub fn get<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T, ExecutionError> {
        let value = self.args.get(index).ok_or_else(|| {
            ExecutionError::argument(format!("missing positional argument {index}"))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ExecutionError::argument(format!("positional argument {index}: {e}"))
        })
    }

    /// Decode an optional keyword argument.
    pub fn kwarg_value<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, ExecutionError> {
        self.kwargs
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| ExecutionError::argument(format!("keyword argument {name}: {e}")))
            })
            .transpose()
    }
}

/// What a job runs: a registered callable name plus its arguments.
///
/// Never carries code; workers resolve `function` against their registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Name of the registered remote callable.
    pub function: String,
    #[serde(flatten)]
    pub call: CallArgs,
    /// Wall-clock limit in seconds, overriding the pool default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl JobPayload {
    pub fn new(function: impl Into<String>, call: CallArgs) -> Self {
        Self {
            function: function.into(),
            call,
            timeout_secs: None,
        }
    }

    /// Set the execution timeout for this call.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Reject payloads that can never be dispatched.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.function.is_empty() {
            return Err(SubmissionError::new("function name is empty"));
        }
        if self.function.len() > MAX_FUNCTION_NAME_LEN {
            return Err(SubmissionError::new(format!(
                "function name exceeds {MAX_FUNCTION_NAME_LEN} characters"
            )));
        }
        if let Some(c) = self
            .function
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
        {
            return Err(SubmissionError::new(format!(
                "function name contains invalid character {c:?}"
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(SubmissionError::new("timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// A job represents one remote call travelling through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The call to execute.
    pub payload: JobPayload,
    /// Current status.
    pub status: JobStatus,
    /// Number of lease acquisitions so far.
    #[serde(default)]
    pub attempt: u32,
    /// Redelivery ceiling; an expired lease at this attempt fails the job.
    pub max_attempts: u32,
    /// The current lease while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Set by a cancel request against a running job.
    #[serde(default)]
    pub cancel_requested: bool,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            payload,
            status: JobStatus::Queued,
            attempt: 0,
            max_attempts: 3,
            lease: None,
            cancel_requested: false,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Set the redelivery ceiling for this job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The lease, if one is installed and held by `worker_id` at `now`.
    pub fn lease_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> Option<&Lease> {
        self.lease
            .as_ref()
            .filter(|lease| lease.worker_id == worker_id && !lease.is_expired(now))
    }

    /// Whether a running job's lease has lapsed at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self.lease.as_ref().is_none_or(|lease| lease.is_expired(now))
    }
}
