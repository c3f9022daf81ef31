//! Submission, status and cancellation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use roam_core::{CancelResponse, Job, JobPayload, SubmitResponse};
use serde::Deserialize;

use super::parse_job_id;
use crate::controller::Controller;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct CancelQuery {
    reason: Option<String>,
}

async fn submit_job(
    State(controller): State<Controller>,
    payload: Result<Json<JobPayload>, JsonRejection>,
) -> AppResult<Json<SubmitResponse>> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job_id = controller.submit(payload).await?;
    Ok(Json(SubmitResponse { job_id }))
}

async fn get_job(
    State(controller): State<Controller>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Job>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(controller.job(job_id).await?))
}

async fn cancel_job(
    State(controller): State<Controller>,
    Path(job_id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> AppResult<Json<CancelResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let status = controller.cancel(job_id, query.reason).await?;
    tracing::info!(job_id = %job_id, status = ?status, "Cancel requested");
    Ok(Json(CancelResponse { job_id, status }))
}

pub fn router() -> Router<Controller> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
}
