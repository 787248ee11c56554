//! Process spawning and the output pump.

use std::process::Stdio;
use std::time::Instant;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::launch::{LaunchSpec, OutputSink, RunError, RunOutcome};

/// Chunks buffered between the pipe reader and the consumer.
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Bytes requested from the pipe per read.
const READ_BUFFER_BYTES: usize = 8 * 1024;

/// Output without a line terminator is flushed once this much piles up.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Launch `spec` and stream its output until the process exits.
///
/// stdout and stderr share one OS pipe, so the kernel keeps the two streams
/// in the exact order the process wrote them. A single pump task cuts the
/// bytes into chunks ending at `\n` or `\r` (progress bars redraw with a
/// bare `\r`) and forwards them to one consumer. The consumer appends each
/// chunk to the log file, then hands it to `sink`, so both always see the
/// same sequence.
///
/// A process that starts and exits nonzero is a successful run with a
/// nonzero [`RunOutcome::exit_code`]. On any [`RunError`] after the spawn
/// the child is killed.
pub async fn run_streaming<S: OutputSink>(
    spec: &LaunchSpec,
    sink: &S,
) -> Result<RunOutcome, RunError> {
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_file)
        .await
        .map_err(RunError::LogFile)?;

    let (reader, writer) = std::io::pipe().map_err(RunError::Pipe)?;
    let stderr_writer = writer.try_clone().map_err(RunError::Pipe)?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer)
        .kill_on_drop(true);
    for (key, value) in &spec.env_vars {
        cmd.env(key, value);
    }

    let (tx, mut rx) = mpsc::channel::<String>(CHUNK_CHANNEL_CAPACITY);
    let pump = spawn_pump(reader, tx).map_err(RunError::Pipe)?;

    let start = Instant::now();
    let spawned = cmd.spawn();
    // Closes the parent's copies of the write end so the pump sees EOF.
    drop(cmd);
    let mut child = match spawned {
        Ok(child) => child,
        Err(source) => {
            pump.abort();
            return Err(RunError::Launch {
                program: spec.program.clone(),
                source,
            });
        }
    };
    tracing::debug!(pid = ?child.id(), program = %spec.program, "Process spawned");

    let drive = async {
        while let Some(chunk) = rx.recv().await {
            log.write_all(chunk.as_bytes())
                .await
                .map_err(RunError::LogFile)?;
            sink.append(chunk).await;
        }
        log.flush().await.map_err(RunError::LogFile)?;
        child.wait().await.map_err(RunError::Wait)
    };

    let result = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, drive).await {
            Ok(result) => result,
            Err(_elapsed) => Err(RunError::Timeout {
                elapsed_ms: elapsed_ms(start),
            }),
        },
        None => drive.await,
    };

    let status = match result {
        Ok(status) => status,
        Err(e) => {
            let _ = child.kill().await;
            pump.abort();
            let _ = log.flush().await;
            return Err(e);
        }
    };

    Ok(RunOutcome {
        exit_code: status.code(),
        duration_ms: elapsed_ms(start),
    })
}

/// Start forwarding the read end of the output pipe to `tx`.
#[cfg(unix)]
fn spawn_pump(
    reader: std::io::PipeReader,
    tx: mpsc::Sender<String>,
) -> std::io::Result<JoinHandle<()>> {
    use std::os::fd::OwnedFd;
    use tokio::io::AsyncReadExt;
    use tokio::net::unix::pipe;

    let mut receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok(tokio::spawn(async move {
        let mut splitter = ChunkSplitter::new(MAX_PENDING_BYTES);
        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        loop {
            match receiver.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for chunk in splitter.push(&buf[..n]) {
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read process output");
                    break;
                }
            }
        }
        if let Some(rest) = splitter.finish() {
            let _ = tx.send(rest).await;
        }
    }))
}

/// Start forwarding the read end of the output pipe to `tx`.
#[cfg(not(unix))]
fn spawn_pump(
    mut reader: std::io::PipeReader,
    tx: mpsc::Sender<String>,
) -> std::io::Result<JoinHandle<()>> {
    use std::io::Read;

    Ok(tokio::task::spawn_blocking(move || {
        let mut splitter = ChunkSplitter::new(MAX_PENDING_BYTES);
        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for chunk in splitter.push(&buf[..n]) {
                        if tx.blocking_send(chunk).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read process output");
                    break;
                }
            }
        }
        if let Some(rest) = splitter.finish() {
            let _ = tx.blocking_send(rest);
        }
    }))
}

/// Cuts a byte stream into text chunks.
///
/// A chunk ends after each `\n` or `\r`. Unterminated output is cut at a
/// UTF-8 boundary once `max_pending` bytes are waiting. Invalid UTF-8 is
/// replaced rather than dropped.
struct ChunkSplitter {
    pending: Vec<u8>,
    max_pending: usize,
}

impl ChunkSplitter {
    fn new(max_pending: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_pending: max_pending.max(4),
        }
    }

    fn push(&mut self, mut bytes: &[u8]) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(pos) = bytes.iter().position(|&b| b == b'\n' || b == b'\r') {
            self.pending.extend_from_slice(&bytes[..=pos]);
            chunks.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
            bytes = &bytes[pos + 1..];
        }
        self.pending.extend_from_slice(bytes);

        while self.pending.len() >= self.max_pending {
            let cut = utf8_boundary(&self.pending[..self.max_pending]);
            let head: Vec<u8> = self.pending.drain(..cut).collect();
            chunks.push(String::from_utf8_lossy(&head).into_owned());
        }
        chunks
    }

    /// Whatever is left once the stream ends.
    fn finish(self) -> Option<String> {
        (!self.pending.is_empty()).then(|| String::from_utf8_lossy(&self.pending).into_owned())
    }
}

/// Length of the longest prefix of `buf` that does not split a character.
fn utf8_boundary(buf: &[u8]) -> usize {
    match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
        Err(_) => buf.len(),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::job::JobStatus;

    /// Sink collecting chunks in memory.
    #[derive(Default)]
    struct VecSink(Mutex<Vec<String>>);

    impl VecSink {
        fn chunks(&self) -> Vec<String> {
            self.0.lock().expect("lock").clone()
        }
    }

    impl OutputSink for VecSink {
        async fn append(&self, chunk: String) {
            self.0.lock().expect("lock").push(chunk);
        }
    }

    fn sh_spec(dir: &Path, script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: dir.to_path_buf(),
            env_vars: vec![],
            log_file: dir.join("run.log"),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_into_log_and_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "echo out; echo err >&2; exit 0");
        let sink = VecSink::default();

        let outcome = run_streaming(&spec, &sink).await.expect("run");
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.status(), JobStatus::Finished);
        assert_eq!(sink.chunks(), ["out\n", "err\n"]);

        let log = std::fs::read_to_string(&spec.log_file).expect("read log");
        assert_eq!(log, "out\nerr\n");
    }

    #[tokio::test]
    async fn interleaved_stdout_and_stderr_keep_write_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(
            dir.path(),
            "for i in $(seq 1 200); do echo o$i; echo e$i >&2; done",
        );
        let sink = VecSink::default();

        run_streaming(&spec, &sink).await.expect("run");

        let expected: String = (1..=200).map(|i| format!("o{i}\ne{i}\n")).collect();
        assert_eq!(sink.chunks().concat(), expected);
        let log = std::fs::read_to_string(&spec.log_file).expect("read log");
        assert_eq!(log, expected);
    }

    #[tokio::test]
    async fn carriage_return_progress_is_visible_before_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "printf 'step 1/2\\r'; sleep 2; printf 'step 2/2\\r'");
        let sink = Arc::new(VecSink::default());

        let task_sink = Arc::clone(&sink);
        let handle = tokio::spawn(async move { run_streaming(&spec, &*task_sink).await });

        let mut seen = false;
        for _ in 0..100 {
            if !sink.chunks().is_empty() {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen, "progress update should arrive while the process runs");
        assert!(!handle.is_finished());
        assert_eq!(sink.chunks(), ["step 1/2\r"]);

        handle.await.expect("join").expect("run");
        assert_eq!(sink.chunks(), ["step 1/2\r", "step 2/2\r"]);
    }

    #[tokio::test]
    async fn unterminated_output_is_flushed_in_bounded_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "head -c 200000 /dev/zero | tr '\\0' 'a'");
        let sink = VecSink::default();

        run_streaming(&spec, &sink).await.expect("run");

        let chunks = sink.chunks();
        assert!(chunks.len() > 1);
        assert!(chunks
            .iter()
            .all(|c| c.len() <= MAX_PENDING_BYTES + READ_BUFFER_BYTES));
        assert_eq!(chunks.concat(), "a".repeat(200_000));
    }

    #[test]
    fn splitter_cuts_after_newline_and_carriage_return() {
        let mut splitter = ChunkSplitter::new(1024);
        assert_eq!(splitter.push(b"10%\r20%\rdone\npart"), ["10%\r", "20%\r", "done\n"]);
        assert_eq!(splitter.push(b"ial\n"), ["partial\n"]);
        assert!(splitter.push(b"tail").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn splitter_never_splits_a_character() {
        let mut splitter = ChunkSplitter::new(4);
        assert_eq!(splitter.push("aaaé".as_bytes()), ["aaa"]);
        assert_eq!(splitter.finish().as_deref(), Some("é"));
    }

    #[test]
    fn splitter_replaces_invalid_utf8() {
        let mut splitter = ChunkSplitter::new(1024);
        assert_eq!(splitter.push(b"a\xffb\n"), ["a\u{fffd}b\n"]);
        assert!(ChunkSplitter::new(1024).finish().is_none());
    }

    #[tokio::test]
    async fn lines_of_one_stream_keep_their_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "for i in 1 2 3 4 5; do echo line$i; done");
        let sink = VecSink::default();

        run_streaming(&spec, &sink).await.expect("run");
        assert_eq!(sink.chunks().concat(), "line1\nline2\nline3\nline4\nline5\n");
        let log = std::fs::read_to_string(&spec.log_file).expect("read log");
        assert_eq!(log, sink.chunks().concat());
    }

    #[tokio::test]
    async fn log_file_is_appended_not_truncated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "echo second");
        std::fs::write(&spec.log_file, "first\n").expect("seed log");

        run_streaming(&spec, &VecSink::default()).await.expect("run");
        let log = std::fs::read_to_string(&spec.log_file).expect("read log");
        assert_eq!(log, "first\nsecond\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_outcome_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "echo boom; exit 3");

        let outcome = run_streaming(&spec, &VecSink::default()).await.expect("run");
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = sh_spec(dir.path(), "");
        spec.program = dir.path().join("no-such-binary").display().to_string();

        let result = run_streaming(&spec, &VecSink::default()).await;
        assert_matches!(result, Err(RunError::Launch { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = sh_spec(dir.path(), "echo started; sleep 30");
        spec.timeout = Some(Duration::from_millis(300));
        let sink = VecSink::default();

        let result = run_streaming(&spec, &sink).await;
        assert_matches!(result, Err(RunError::Timeout { .. }));
        assert_eq!(sink.chunks(), ["started\n"]);
    }

    #[tokio::test]
    async fn runs_in_working_dir_with_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = sh_spec(dir.path(), "echo $REPO_ROOT; touch marker");
        spec.env_vars = vec![("REPO_ROOT".into(), "/opt/pipeline".into())];
        let sink = VecSink::default();

        run_streaming(&spec, &sink).await.expect("run");
        assert_eq!(sink.chunks(), ["/opt/pipeline\n"]);
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn output_is_visible_before_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh_spec(dir.path(), "echo early; sleep 2; echo late");
        let sink = Arc::new(VecSink::default());

        let task_sink = Arc::clone(&sink);
        let handle = tokio::spawn(async move { run_streaming(&spec, &*task_sink).await });

        let mut seen_early = false;
        for _ in 0..100 {
            if !sink.chunks().is_empty() {
                seen_early = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen_early, "first line should arrive while the process runs");
        assert!(!handle.is_finished());
        assert_eq!(sink.chunks(), ["early\n"]);

        handle.await.expect("join").expect("run");
        assert_eq!(sink.chunks(), ["early\n", "late\n"]);
    }
}
