use std::collections::HashMap;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::controller::Controller;
use crate::error::AppResult;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    jobs: HashMap<String, u64>,
}

async fn health_check(State(controller): State<Controller>) -> AppResult<Json<HealthResponse>> {
    let jobs = controller.health().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs,
    }))
}

pub fn router() -> Router<Controller> {
    Router::new().route("/healthz", get(health_check))
}
