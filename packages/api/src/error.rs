//! HTTP error responses.

use actors::{BusError, QueueError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use roam_core::ErrorBody;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses
/// of the form `{ "error": message, "code": CODE }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Bus(#[from] BusError),

    /// A request that could not be parsed.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Queue(QueueError::Submission(msg)) => (
                StatusCode::BAD_REQUEST,
                "SUBMISSION_ERROR",
                format!("malformed payload: {msg}"),
            ),
            AppError::Queue(QueueError::NotFound(job_id)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("job {job_id} not found"),
            ),
            AppError::Queue(QueueError::Unavailable(msg)) => {
                tracing::warn!(error = %msg, "Queue unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUEUE_UNAVAILABLE",
                    "queue unavailable, retry later".to_string(),
                )
            }
            AppError::Bus(BusError::Store(e)) => {
                tracing::warn!(error = %e, "Event store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUEUE_UNAVAILABLE",
                    "event store unavailable, retry later".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            other => {
                tracing::error!(error = %other, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = self.classify();
        let body = ErrorBody {
            error,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_core::JobId;

    #[test]
    fn queue_errors_map_to_statuses() {
        let cases = [
            (QueueError::Submission("empty".into()), StatusCode::BAD_REQUEST),
            (QueueError::NotFound(JobId::new()), StatusCode::NOT_FOUND),
            (QueueError::Unavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                QueueError::LeaseLost {
                    job_id: JobId::new(),
                    worker_id: "w".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).into_response().status(), status);
        }
    }
}
