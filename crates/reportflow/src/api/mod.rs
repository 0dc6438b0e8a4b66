use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::api::models::{HealthResponse, JobDetail};
use crate::jobs::{JobId, JobStore};

pub mod models;

const RECENT_JOBS: i64 = 20;

#[derive(Clone)]
pub struct ApiState {
    pub jobs: Arc<dyn JobStore>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn internal_err(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "api request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: format!("internal error: {e}"),
        }),
    )
        .into_response()
}

pub async fn list_jobs(State(state): State<ApiState>) -> Response {
    match state.jobs.list_recent(RECENT_JOBS).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => internal_err(e),
    }
}

pub async fn get_job(Path(id): Path<JobId>, State(state): State<ApiState>) -> Response {
    match state.jobs.get(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(JobDetail::from(job))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "Job not found".into(),
            }),
        )
            .into_response(),
        Err(e) => internal_err(e),
    }
}

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: "report-service",
        }),
    )
}
