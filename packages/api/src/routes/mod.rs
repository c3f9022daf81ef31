pub mod events;
pub mod health;
pub mod jobs;

use roam_core::JobId;

use crate::error::{AppError, AppResult};

fn parse_job_id(raw: &str) -> AppResult<JobId> {
    JobId::parse(raw).map_err(|e| AppError::BadRequest(format!("invalid job id '{raw}': {e}")))
}
