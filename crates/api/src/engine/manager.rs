//! Job submission and background execution.
//!
//! [`JobManager::submit`] records the job and returns immediately. The
//! actual work happens on a dedicated Tokio task per job:
//!
//! 1. Allocate the output directory and log file, attach them to the record.
//! 2. Write the pipeline inputs (structure, benchmark JSON, sweep config).
//! 3. Launch the external program and stream its output into the record.
//! 4. Write the terminal status.
//!
//! Every failure along the way ends in `Failed` with an `ERROR:` line in the
//! job log. A supervisor task watches the job task so that even a panic
//! cannot leave a job `Running` forever.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use drylab_core::error::CoreError;
use drylab_core::job::{validate_job_request, JobRecord, JobRequest, JobStatus, JobSummary};
use drylab_core::pipeline;
use drylab_core::runner::{self, LaunchSpec, OutputSink};
use drylab_core::types::JobId;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::registry::JobRegistry;
use crate::config::JobSettings;

/// Response body for a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub id: JobId,
    pub status: JobStatus,
}

/// Entry point for everything job-related. Held in
/// [`AppState`](crate::state::AppState) as an `Arc<JobManager>`.
pub struct JobManager {
    pub(super) registry: Arc<JobRegistry>,
    pub(super) settings: Arc<JobSettings>,
}

impl JobManager {
    /// Create a manager with an empty registry.
    pub fn new(settings: JobSettings) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            settings: Arc::new(settings),
        }
    }

    /// Validate and record a job, then start it in the background.
    ///
    /// Returns as soon as the record exists; the job is `Running` from this
    /// point on.
    pub async fn submit(&self, request: JobRequest) -> Result<SubmitResponse, CoreError> {
        validate_job_request(&request)?;

        let job = self.registry.create(&request).await;
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            active_site_blocks = job.active_site_atoms.len(),
            "Job submitted",
        );

        spawn_job(
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
            job.id.clone(),
            request,
        );

        Ok(SubmitResponse {
            id: job.id,
            status: job.status,
        })
    }

    /// Full record of one job.
    pub async fn get(&self, id: &str) -> Result<JobRecord, CoreError> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            })
    }

    /// Summaries of all jobs in submission order.
    pub async fn list(&self) -> Vec<JobSummary> {
        self.registry
            .list()
            .await
            .iter()
            .map(JobSummary::from)
            .collect()
    }

    /// Number of jobs recorded since startup.
    pub async fn job_count(&self) -> usize {
        self.registry.len().await
    }
}

// ---------------------------------------------------------------------------
// Background execution
// ---------------------------------------------------------------------------

/// Forwards process output into the job record.
struct RegistrySink {
    registry: Arc<JobRegistry>,
    job_id: JobId,
}

impl OutputSink for RegistrySink {
    async fn append(&self, chunk: String) {
        self.registry
            .update(&self.job_id, |job| job.append_log(&chunk))
            .await;
    }
}

/// Run the job on its own task, supervised so it always reaches a terminal
/// status.
fn spawn_job(
    registry: Arc<JobRegistry>,
    settings: Arc<JobSettings>,
    job_id: JobId,
    request: JobRequest,
) {
    let task = tokio::spawn(execute_job(
        Arc::clone(&registry),
        settings,
        job_id.clone(),
        request,
    ));

    tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(job_id = %job_id, error = %e, "Job task aborted");
            fail_job(&registry, &job_id, None, &format!("job task aborted: {e}")).await;
        }
    });
}

async fn execute_job(
    registry: Arc<JobRegistry>,
    settings: Arc<JobSettings>,
    job_id: JobId,
    request: JobRequest,
) {
    let spec = match allocate_workspace(&settings, &job_id, &request).await {
        Ok(spec) => spec,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to allocate job workspace");
            fail_job(
                &registry,
                &job_id,
                None,
                &format!("failed to allocate workspace: {e}"),
            )
            .await;
            return;
        }
    };

    let attached = registry
        .update(&job_id, |job| {
            job.attach_workspace(
                spec.working_dir.clone(),
                spec.log_file.clone(),
                spec.command_line(),
            )
        })
        .await;
    if let Some(Err(e)) = attached {
        fail_job(&registry, &job_id, Some(&spec.log_file), &e.to_string()).await;
        return;
    }

    if let Err(e) = write_inputs(&settings, &job_id, &request, &spec.working_dir).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to write job inputs");
        fail_job(
            &registry,
            &job_id,
            Some(&spec.log_file),
            &format!("failed to write inputs: {e}"),
        )
        .await;
        return;
    }
    tracing::debug!(
        job_id = %job_id,
        outdir = %spec.working_dir.display(),
        log_file = %spec.log_file.display(),
        "Workspace prepared",
    );

    tracing::info!(job_id = %job_id, cmd = %spec.command_line(), "Launching job process");

    let sink = RegistrySink {
        registry: Arc::clone(&registry),
        job_id: job_id.clone(),
    };

    match runner::run_streaming(&spec, &sink).await {
        Ok(outcome) => {
            let status = outcome.status();
            registry
                .update(&job_id, |job| job.finish(status, Utc::now()))
                .await;
            tracing::info!(
                job_id = %job_id,
                exit_code = ?outcome.exit_code,
                duration_ms = outcome.duration_ms,
                status = ?status,
                "Job process exited",
            );
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job process failed");
            fail_job(&registry, &job_id, Some(&spec.log_file), &e.to_string()).await;
        }
    }
}

/// Append a diagnostic to the job log (file and record) and mark it failed.
///
/// A job that already reached a terminal status keeps it.
async fn fail_job(registry: &JobRegistry, job_id: &str, log_file: Option<&Path>, message: &str) {
    let diagnostic = format!("\nERROR: {message}\n");

    if let Some(path) = log_file {
        if let Err(e) = append_to_file(path, &diagnostic).await {
            tracing::warn!(job_id, error = %e, "Failed to write diagnostic to log file");
        }
    }

    registry
        .update(job_id, |job| {
            if !job.status.is_terminal() {
                job.append_log(&diagnostic);
                job.finish(JobStatus::Failed, Utc::now());
            }
        })
        .await;
}

async fn append_to_file(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

// ---------------------------------------------------------------------------
// Workspace preparation
// ---------------------------------------------------------------------------

/// Create the job's private output directory and pick its log file.
///
/// The output directory is a fresh `<id>_XXXXXX` directory under the
/// workspace root and the log file takes the same unique name, so ids
/// recycled by a restarted process never touch old output or old logs.
async fn allocate_workspace(
    settings: &JobSettings,
    job_id: &str,
    request: &JobRequest,
) -> std::io::Result<LaunchSpec> {
    tokio::fs::create_dir_all(&settings.workspace_root).await?;
    let outdir = tempfile::Builder::new()
        .prefix(&format!("{job_id}_"))
        .tempdir_in(&settings.workspace_root)?
        .keep();
    let outdir = tokio::fs::canonicalize(&outdir).await?;

    tokio::fs::create_dir_all(&settings.log_dir).await?;
    let log_dir = tokio::fs::canonicalize(&settings.log_dir).await?;
    let workspace_name = outdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| job_id.to_string());
    let log_file = log_dir.join(format!("{workspace_name}.log"));
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&log_file)
        .await?;

    let key = pipeline::bench_key(&request.job_type);
    let mut args = settings.program_args.clone();
    args.extend(pipeline::launch_args(job_id, &key));

    let mut env_vars = Vec::new();
    if std::env::var_os("REPO_ROOT").is_none() {
        let repo_root = tokio::fs::canonicalize(&settings.repo_root)
            .await
            .unwrap_or_else(|_| settings.repo_root.clone());
        env_vars.push(("REPO_ROOT".to_string(), repo_root.display().to_string()));
    }

    Ok(LaunchSpec {
        program: settings.program.clone(),
        args,
        working_dir: outdir,
        env_vars,
        log_file,
        timeout: settings.job_timeout,
    })
}

/// Write the structure file into the output directory and register the job
/// with the pipeline's benchmark and sweep configuration.
async fn write_inputs(
    settings: &JobSettings,
    job_id: &str,
    request: &JobRequest,
    outdir: &Path,
) -> std::io::Result<()> {
    let input_pdb = outdir.join(pipeline::INPUT_PDB_FILE);
    tokio::fs::write(&input_pdb, &request.pdb_data).await?;

    let key = pipeline::bench_key(&request.job_type);
    let overrides = pipeline::build_overrides(request, &input_pdb);

    let config_dir: PathBuf = settings.benchmark_dir.join("configs");
    tokio::fs::create_dir_all(&config_dir).await?;

    let bench_json_name = format!("{job_id}.json");
    let bench_json = serde_json::to_vec(&pipeline::benchmark_json(&key, &overrides))
        .map_err(std::io::Error::other)?;
    tokio::fs::write(settings.benchmark_dir.join(&bench_json_name), bench_json).await?;

    let yaml = pipeline::sweep_config_yaml(&bench_json_name, outdir);
    tokio::fs::write(config_dir.join(format!("{job_id}.yaml")), yaml).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
