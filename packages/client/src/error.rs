//! Errors surfaced to callers of remote functions.

use roam_core::{ExecutionError, JobId};

/// Errors from remote calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The controller rejected the payload; no job was created.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// The controller could not reach its queue; retry allowed.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// The remote callable failed. `kind` and `message` are the remote ones.
    #[error("{kind}: {message}")]
    Execution { kind: String, message: String },

    #[error("job {job_id} was cancelled")]
    Cancelled { job_id: JobId },

    /// The event stream ended before the terminal event.
    #[error("event stream disconnected: {0}")]
    StreamDisconnect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// A blocking call was made from inside an async runtime.
    #[error("blocking call made from an async context; use the async entry point")]
    BlockingInAsyncContext,

    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    /// Whether reconnecting may get past this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::StreamDisconnect(_)
                | ClientError::Transport(_)
                | ClientError::QueueUnavailable(_)
        )
    }
}

impl From<ExecutionError> for ClientError {
    fn from(e: ExecutionError) -> Self {
        ClientError::Execution {
            kind: e.kind,
            message: e.message,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}
