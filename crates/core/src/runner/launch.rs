//! Launch description, outcome and error types shared by the runner.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobStatus;

/// Everything needed to start one external process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory of the child process.
    pub working_dir: PathBuf,
    /// Extra environment variables; the parent environment is inherited.
    pub env_vars: Vec<(String, String)>,
    /// File every output chunk is appended to.
    pub log_file: PathBuf,
    /// Wall-clock limit. `None` lets the process run until it exits.
    pub timeout: Option<Duration>,
}

impl LaunchSpec {
    /// Human-readable command line, for diagnostics only.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Terminal job status implied by the exit code.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_exit_code(self.exit_code)
    }
}

/// Failures that prevent a run from producing a [`RunOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The log file could not be opened or written.
    #[error("Log file error: {0}")]
    LogFile(#[source] std::io::Error),

    /// The shared stdout/stderr pipe could not be set up.
    #[error("Failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    /// The program could not be started (missing executable, permissions).
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child process failed.
    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    /// The process outlived its wall-clock limit and was killed.
    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Receiver of output chunks, in the order the process produced them.
pub trait OutputSink: Send + Sync {
    fn append(&self, chunk: String) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = LaunchSpec {
            program: "apptainer".into(),
            args: vec!["exec".into(), "--nv".into()],
            working_dir: PathBuf::from("/tmp"),
            env_vars: vec![],
            log_file: PathBuf::from("/tmp/x.log"),
            timeout: None,
        };
        assert_eq!(spec.command_line(), "apptainer exec --nv");
    }

    #[test]
    fn outcome_status_follows_exit_code() {
        let ok = RunOutcome {
            exit_code: Some(0),
            duration_ms: 5,
        };
        let failed = RunOutcome {
            exit_code: Some(1),
            duration_ms: 5,
        };
        assert_eq!(ok.status(), JobStatus::Finished);
        assert_eq!(failed.status(), JobStatus::Failed);
    }

    #[test]
    fn launch_error_names_program() {
        let err = RunError::Launch {
            program: "/missing/bin".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        };
        assert!(err.to_string().starts_with("Failed to launch '/missing/bin'"));
    }
}
