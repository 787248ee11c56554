//! Route definitions for the `/jobs` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::{jobs, outputs};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> submit_job
/// GET    /{id}            -> get_job
/// GET    /{id}/log        -> get_job_log
/// GET    /{id}/tree       -> get_job_tree
/// GET    /{id}/file       -> get_job_file
/// GET    /{id}/download   -> download_job_output
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/log", get(jobs::get_job_log))
        .route("/{id}/tree", get(outputs::get_job_tree))
        .route("/{id}/file", get(outputs::get_job_file))
        .route("/{id}/download", get(outputs::download_job_output))
}
