//! Job data model and lifecycle rules.
//!
//! A [`JobRecord`] starts `Running`, gets its workspace attached exactly once
//! right before the external process launches, accumulates log output while
//! it runs, and is finalized exactly once into a terminal [`JobStatus`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    /// Whether this status can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Map a process exit code to a terminal status. Processes killed by a
    /// signal have no exit code and count as failures.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Finished,
            _ => Self::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One `{residue, atoms}` pair of the active site, e.g. `HIS57` / `N,CA,CB`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSiteBlock {
    pub residue: String,
    pub atoms: String,
}

/// DTO for submitting a new job via `POST /api/v1/jobs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub job_name: String,
    pub job_type: String,
    #[serde(default)]
    pub ligand: String,
    #[serde(default)]
    pub pdb_data: String,
    #[serde(default)]
    pub contigs: String,
    #[serde(default)]
    pub active_site_atoms: Vec<ActiveSiteBlock>,
}

/// Validate a job request before anything is allocated for it.
pub fn validate_job_request(request: &JobRequest) -> Result<(), CoreError> {
    if request.job_type.trim().is_empty() {
        return Err(CoreError::Validation("job_type must not be empty".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Output produced by a job while it runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobResults {
    /// Combined stdout/stderr of the external process. Append-only.
    pub log: String,
}

/// Authoritative in-memory state of a single job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub job_type: String,
    pub ligand: String,
    pub pdb_data: String,
    pub contigs: String,
    pub active_site_atoms: Vec<ActiveSiteBlock>,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub outdir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub cmd: Option<String>,
    pub results: JobResults,
}

impl JobRecord {
    /// Snapshot a request into a fresh `Running` record.
    ///
    /// The display name falls back to the job type when no name was given.
    pub fn new(id: JobId, request: &JobRequest, created_at: Timestamp) -> Self {
        let name = if request.job_name.trim().is_empty() {
            request.job_type.clone()
        } else {
            request.job_name.clone()
        };

        Self {
            id,
            name,
            job_type: request.job_type.clone(),
            ligand: request.ligand.clone(),
            pdb_data: request.pdb_data.clone(),
            contigs: request.contigs.clone(),
            active_site_atoms: request.active_site_atoms.clone(),
            status: JobStatus::Running,
            created_at,
            finished_at: None,
            outdir: None,
            log_file: None,
            cmd: None,
            results: JobResults::default(),
        }
    }

    /// Record where the job writes its output and log, and what was launched.
    ///
    /// Returns `Conflict` if a workspace was already attached; the output
    /// directory of a job never moves once clients may have seen it.
    pub fn attach_workspace(
        &mut self,
        outdir: PathBuf,
        log_file: PathBuf,
        cmd: String,
    ) -> Result<(), CoreError> {
        if self.outdir.is_some() {
            return Err(CoreError::Conflict(format!(
                "Job {} already has an output directory",
                self.id
            )));
        }
        self.outdir = Some(outdir);
        self.log_file = Some(log_file);
        self.cmd = Some(cmd);
        Ok(())
    }

    /// Append a chunk of process output to the in-memory log.
    pub fn append_log(&mut self, chunk: &str) {
        self.results.log.push_str(chunk);
    }

    /// Move the job into a terminal status.
    ///
    /// Only `Running -> Finished | Failed` is accepted. Returns `false` (and
    /// leaves the record untouched) for any other transition.
    pub fn finish(&mut self, status: JobStatus, at: Timestamp) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(at);
        true
    }
}

/// Condensed view of a job used by list responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub has_output: bool,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            job_type: job.job_type.clone(),
            status: job.status,
            created_at: job.created_at,
            finished_at: job.finished_at,
            has_output: job.outdir.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
