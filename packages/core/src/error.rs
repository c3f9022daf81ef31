//! Errors that travel as data between components.

use serde::{Deserialize, Serialize};

/// A failure raised by a remote callable, or imposed on it by the worker.
///
/// Carried inside `Failed` terminal events and re-raised by the client
/// with `kind` and `message` preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    /// Error class, e.g. `ValueError` or `Timeout`.
    pub kind: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A plain error raised by callable code.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new("ArgumentError", message)
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new("UnknownFunction", format!("no callable registered as '{name}'"))
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            "Timeout",
            format!("execution exceeded {}s", after.as_secs_f64()),
        )
    }

    pub fn max_attempts(attempts: u32) -> Self {
        Self::new(
            "MaxAttemptsExceeded",
            format!("max attempts exceeded ({attempts})"),
        )
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new("Panic", message)
    }

    /// Build a `Panic` error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "callable panicked".to_string()
        };
        Self::panic(message)
    }
}

/// A payload that was rejected before any job was created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed payload: {0}")]
pub struct SubmissionError(pub String);

impl SubmissionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
