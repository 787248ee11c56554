//! Handlers for browsing and downloading a job's output directory.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::engine::outputs::Download;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FileParams {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Guess a Content-Type from a file extension.
fn content_type_for_extension(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "zip" => "application/zip",
        "json" => "application/json",
        "txt" | "log" | "pdb" | "cif" | "yaml" | "yml" | "fasta" | "sc" => {
            "text/plain; charset=utf-8"
        }
        "png" => "image/png",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// `attachment; filename="<name>"` with quotes in the name neutralised.
fn attachment(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/tree
pub async fn get_job_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let tree = state.jobs.tree(&id).await?;
    Ok(Json(DataResponse { data: tree }))
}

/// GET /api/v1/jobs/{id}/file?path=<relative path>
///
/// Text preview of one output file, capped at the configured size.
pub async fn get_job_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FileParams>,
) -> AppResult<impl IntoResponse> {
    let path = params
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("Query parameter 'path' is required".into()))?;

    let file = state.jobs.read_file(&id, &path).await?;
    Ok(Json(DataResponse { data: file }))
}

/// GET /api/v1/jobs/{id}/download[?path=<relative path>]
///
/// Streams a zip of the whole output directory, a zip of one sub-directory,
/// or a single file untouched.
pub async fn download_job_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> AppResult<Response> {
    let download = state.jobs.download(&id, params.path.as_deref()).await?;

    match download {
        Download::Archive(archive) => {
            let file = tokio::fs::File::open(archive.path())
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            let size = file
                .metadata()
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?
                .len();
            let disposition = attachment(archive.file_name());

            // The scratch directory lives exactly as long as the body.
            let stream = ReaderStream::new(file).map(move |chunk| {
                let _guard = &archive;
                chunk
            });

            tracing::info!(job_id = %id, size, "Streaming archive download");
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/zip")
                .header(header::CONTENT_LENGTH, size.to_string())
                .header(header::CONTENT_DISPOSITION, disposition)
                .body(Body::from_stream(stream))
                .map_err(|e| AppError::InternalError(e.to_string()))
        }
        Download::File {
            path,
            file_name,
            size,
        } => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| AppError::InternalError(e.to_string()))?;

            // Stop at the advertised length even if the file is still growing.
            let body = ReaderStream::new(file.take(size));

            tracing::info!(job_id = %id, file = %file_name, size, "Streaming file download");
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type_for_extension(&file_name))
                .header(header::CONTENT_LENGTH, size.to_string())
                .header(header::CONTENT_DISPOSITION, attachment(&file_name))
                .body(Body::from_stream(body))
                .map_err(|e| AppError::InternalError(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
