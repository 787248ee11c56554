#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use drylab_api::config::{JobSettings, ServerConfig};
use drylab_api::engine::manager::JobManager;
use drylab_api::router::build_app_router;
use drylab_api::state::AppState;

/// A router plus the scratch directory its jobs write into.
///
/// Keep the value alive for the whole test; dropping it removes every job
/// workspace and log.
pub struct TestApp {
    pub router: Router,
    pub scratch: tempfile::TempDir,
}

impl TestApp {
    pub fn workspace_root(&self) -> PathBuf {
        self.scratch.path().join("work")
    }
}

/// Job settings that run `script` through `/bin/sh` in place of the
/// external pipeline. The script sees the pipeline's arguments as `$@`.
pub fn test_job_settings(scratch: &Path, script: &str) -> JobSettings {
    let script_path = scratch.join("pipeline.sh");
    std::fs::write(&script_path, script).expect("write stand-in pipeline");

    JobSettings {
        workspace_root: scratch.join("work"),
        log_dir: scratch.join("logs"),
        program: "/bin/sh".to_string(),
        program_args: vec![script_path.display().to_string()],
        benchmark_dir: scratch.join("benchmark"),
        repo_root: scratch.to_path_buf(),
        job_timeout: Some(Duration::from_secs(30)),
        archive_scratch_dir: scratch.join("zips"),
        tree_max_depth: 4,
        tree_max_entries: 500,
        preview_max_bytes: 5 * 1024 * 1024,
    }
}

/// Build a test `ServerConfig` around `jobs`.
pub fn test_config(jobs: JobSettings) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        jobs,
    }
}

/// Build the full application router (same middleware stack as `main.rs`)
/// with jobs that run `script`.
pub fn build_test_app(script: &str) -> TestApp {
    let scratch = tempfile::tempdir().expect("tempdir");
    let config = test_config(test_job_settings(scratch.path(), script));
    build_test_app_with(scratch, config)
}

pub fn build_test_app_with(scratch: tempfile::TempDir, config: ServerConfig) -> TestApp {
    let state = AppState {
        jobs: Arc::new(JobManager::new(config.jobs.clone())),
    };
    TestApp {
        router: build_app_router(state, &config),
        scratch,
    }
}

/// A realistic enzyme design request.
pub fn his57_request() -> Value {
    json!({
        "job_name": "his57 pocket",
        "job_type": "enzyme",
        "ligand": "NAI",
        "pdb_data": "ATOM      1  N   HIS A  57      11.104   6.134  -6.504  1.00  0.00           N\n",
        "contigs": "A1-50,10-20",
        "active_site_atoms": [
            { "residue": "HIS57", "atoms": "N,CA,CB" }
        ]
    })
}

pub async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: &Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit a job and return its id.
pub async fn submit(app: &Router, request: &Value) -> String {
    let response = post_json(app, "/api/v1/jobs", request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    json["data"]["id"].as_str().unwrap().to_string()
}

/// Poll `GET /jobs/{id}` until the job leaves `running`; returns the record.
pub async fn wait_for_terminal(app: &Router, id: &str) -> Value {
    for _ in 0..500 {
        let json = body_json(get(app, &format!("/api/v1/jobs/{id}")).await).await;
        if json["data"]["status"] != "running" {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} still running");
}
