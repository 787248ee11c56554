use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use drylab_core::preview::DEFAULT_PREVIEW_MAX_BYTES;
use drylab_core::tree::{DEFAULT_TREE_DEPTH, DEFAULT_TREE_ENTRIES};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8001`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `120`).
    pub request_timeout_secs: u64,
    /// Job execution and output browsing settings.
    pub jobs: JobSettings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8001`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `120`                      |
    ///
    /// Job settings are read by [`JobSettings::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", 8001);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", 120);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            jobs: JobSettings::from_env(),
        }
    }
}

/// Where jobs run, what they launch, and how their output is served.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Parent directory of the per-job output directories.
    pub workspace_root: PathBuf,
    /// Directory holding `<job id>.log` files.
    pub log_dir: PathBuf,
    /// External program to launch.
    pub program: String,
    /// Arguments placed before the per-job arguments.
    pub program_args: Vec<String>,
    /// Directory receiving benchmark JSON and `configs/<job id>.yaml`.
    pub benchmark_dir: PathBuf,
    /// Exported to the child as `REPO_ROOT` unless already set.
    pub repo_root: PathBuf,
    /// Optional wall-clock limit per job.
    pub job_timeout: Option<Duration>,
    /// Parent of the per-download scratch directories holding built zips.
    pub archive_scratch_dir: PathBuf,
    pub tree_max_depth: usize,
    pub tree_max_entries: usize,
    pub preview_max_bytes: u64,
}

impl JobSettings {
    /// Load job settings from environment variables with defaults.
    ///
    /// | Env Var                  | Default                                    |
    /// |--------------------------|--------------------------------------------|
    /// | `JOB_WORKSPACE_ROOT`     | system temp dir                            |
    /// | `JOB_LOG_DIR`            | `job_logs`                                 |
    /// | `PIPELINE_PROGRAM`       | `apptainer`                                |
    /// | `PIPELINE_PROGRAM_ARGS`  | `exec --nv <sif image> <pipeline.py>`      |
    /// | `PIPELINE_BENCHMARK_DIR` | `rf_diffusion/benchmark`                   |
    /// | `PIPELINE_REPO_ROOT`     | current directory                          |
    /// | `JOB_TIMEOUT_SECS`       | unset (no limit)                           |
    /// | `ARCHIVE_SCRATCH_DIR`    | system temp dir                            |
    /// | `TREE_MAX_DEPTH`         | `4`                                        |
    /// | `TREE_MAX_ENTRIES`       | `500`                                      |
    /// | `FILE_PREVIEW_MAX_BYTES` | `5242880`                                  |
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("JOB_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let log_dir = std::env::var("JOB_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("job_logs"));

        let program = std::env::var("PIPELINE_PROGRAM").unwrap_or_else(|_| "apptainer".into());

        let program_args = std::env::var("PIPELINE_PROGRAM_ARGS")
            .unwrap_or_else(|_| {
                "exec --nv rf_diffusion/exec/bakerlab_rf_diffusion_aa.sif \
                 rf_diffusion/benchmark/pipeline.py"
                    .into()
            })
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let benchmark_dir = std::env::var("PIPELINE_BENCHMARK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("rf_diffusion/benchmark"));

        let repo_root = std::env::var("PIPELINE_REPO_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS").ok().map(|v| {
            Duration::from_secs(v.parse().expect("JOB_TIMEOUT_SECS must be a valid u64"))
        });

        let archive_scratch_dir = std::env::var("ARCHIVE_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        Self {
            workspace_root,
            log_dir,
            program,
            program_args,
            benchmark_dir,
            repo_root,
            job_timeout,
            archive_scratch_dir,
            tree_max_depth: parse_var("TREE_MAX_DEPTH", DEFAULT_TREE_DEPTH),
            tree_max_entries: parse_var("TREE_MAX_ENTRIES", DEFAULT_TREE_ENTRIES),
            preview_max_bytes: parse_var("FILE_PREVIEW_MAX_BYTES", DEFAULT_PREVIEW_MAX_BYTES),
        }
    }
}

/// Read `name` and parse it, panicking on malformed values so that
/// misconfiguration fails at startup.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid value: {e}")),
        Err(_) => default,
    }
}
