//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use drylab_core::job::JobRequest;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/jobs
///
/// Submit a new job. Returns 201 with `{id, status}` as soon as the job is
/// recorded; the external program runs in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<JobRequest>,
) -> AppResult<impl IntoResponse> {
    let submitted = state.jobs.submit(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: submitted })))
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.jobs.list().await;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.get(&id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/log
///
/// Status and log snapshot for live polling.
pub async fn get_job_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let log = state.jobs.log(&id).await?;
    Ok(Json(DataResponse { data: log }))
}
