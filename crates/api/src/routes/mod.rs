pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                          list, submit
/// /jobs/{id}                     full record
/// /jobs/{id}/log                 status + accumulated log
/// /jobs/{id}/tree                output directory listing
/// /jobs/{id}/file?path=          text preview of one output file
/// /jobs/{id}/download[?path=]    zip of the output (or a sub-dir), or one file
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
