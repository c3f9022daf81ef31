//! Controller and HTTP interface for remote execution.
//!
//! This crate exposes the queue and the event bus over HTTP:
//! - `POST /jobs` submits a call
//! - `GET /jobs/{job_id}` returns the job record
//! - `GET /jobs/{job_id}/events` streams the job's events (SSE)
//! - `POST /jobs/{job_id}/cancel` asks for cancellation
//! - `GET /healthz` checks the queue and the bus

mod controller;
mod error;
mod router;
mod routes;

pub use controller::Controller;
pub use error::{AppError, AppResult};
pub use router::{RouterConfig, build_router};
