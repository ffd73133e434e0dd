use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::pipeline::sanitize_id;
use crate::pipeline::upload::UploadHandle;

const DEFAULT_OUTPUT_STEM: &str = "summary";
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub input_path: PathBuf,
    pub output_name: String,
}

impl JobRequest {
    pub fn for_upload(handle: &UploadHandle, requested_name: Option<&str>, unix_ms: u128) -> Self {
        Self {
            input_path: handle.storage_path.clone(),
            output_name: output_file_name(requested_name, unix_ms),
        }
    }
}

/// `{unix_ms}_{name}.pdf`; the caller's name is sanitized and falls back to `summary`.
pub fn output_file_name(requested_name: Option<&str>, unix_ms: u128) -> String {
    let stem = requested_name
        .map(str::trim)
        .map(|name| {
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".pdf") {
                &name[..name.len() - 4]
            } else {
                name
            }
        })
        .map(sanitize_id)
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| String::from(DEFAULT_OUTPUT_STEM));
    format!("{unix_ms}_{stem}.pdf")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl JobOutcome {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(self.stdout.as_slice()).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(self.stderr.as_slice()).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStream {
    Stdout,
    Stderr,
}

impl CaptureStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to start worker '{program}': {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("worker {} exceeded the {limit} byte capture limit", stream.as_str())]
    OutputTooLarge { stream: CaptureStream, limit: usize },
    #[error("worker did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("worker i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Runs one worker per request and resolves once it has exited.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(&self, request: JobRequest) -> Result<JobOutcome, JobError>;
}

pub type SharedWorkerLauncher = Arc<dyn WorkerLauncher>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub output_cap_bytes: usize,
    pub timeout: Option<Duration>,
}

impl From<&WorkerConfig> for WorkerCommandSpec {
    fn from(value: &WorkerConfig) -> Self {
        Self {
            program: value.program.clone(),
            args: value.args.clone(),
            cwd: Some(value.cwd.clone()),
            output_cap_bytes: value.output_cap_bytes,
            timeout: value.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessWorkerLauncher {
    spec: WorkerCommandSpec,
}

impl ProcessWorkerLauncher {
    pub fn new(spec: WorkerCommandSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &WorkerCommandSpec {
        &self.spec
    }

    fn command_for(&self, request: &JobRequest) -> Command {
        let mut command = Command::new(self.spec.program.as_str());
        command
            .args(self.spec.args.iter().map(String::as_str))
            .arg(request.input_path.as_os_str())
            .arg(request.output_name.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = self.spec.cwd.as_deref() {
            command.current_dir(cwd);
        }
        command
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(&self, request: JobRequest) -> Result<JobOutcome, JobError> {
        let mut child =
            self.command_for(&request)
                .spawn()
                .map_err(|source| JobError::LaunchFailed {
                    program: self.spec.program.clone(),
                    source,
                })?;
        info!(
            program = %self.spec.program,
            pid = child.id(),
            input = %request.input_path.display(),
            output_name = %request.output_name,
            "worker started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("worker stderr was not captured"))?;
        let limit = self.spec.output_cap_bytes;

        let completion = async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout, limit, CaptureStream::Stdout),
                read_capped(stderr, limit, CaptureStream::Stderr),
            )?;
            let status = child.wait().await?;
            Ok::<_, JobError>(JobOutcome {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        };

        let result = match self.spec.timeout {
            Some(deadline) => tokio::time::timeout(deadline, completion)
                .await
                .unwrap_or(Err(JobError::TimedOut(deadline))),
            None => completion.await,
        };

        match &result {
            Ok(outcome) => info!(exit_code = outcome.exit_code, "worker exited"),
            Err(error) => {
                let _ = child.start_kill();
                info!(%error, "worker stopped before completion");
            }
        }
        result
    }
}

async fn read_capped<R>(
    mut reader: R,
    limit: usize,
    stream: CaptureStream,
) -> Result<Vec<u8>, JobError>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut lines = LineBuffer::default();
    loop {
        let read = reader.read(chunk.as_mut_slice()).await?;
        if read == 0 {
            if stream == CaptureStream::Stderr {
                if let Some(line) = lines.finish() {
                    debug!(target: "vidsum::worker", line = line.as_str(), "worker stderr");
                }
            }
            return Ok(captured);
        }
        if captured.len() + read > limit {
            return Err(JobError::OutputTooLarge { stream, limit });
        }
        if stream == CaptureStream::Stderr {
            for line in lines.push(&chunk[..read]) {
                debug!(target: "vidsum::worker", line = line.as_str(), "worker stderr");
            }
        }
        captured.extend_from_slice(&chunk[..read]);
    }
}

/// Reassembles newline-terminated lines across read boundaries.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete[..last_newline]
            .split(|byte| *byte == b'\n')
            .map(decode_line)
            .collect()
    }

    fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode_line(self.pending.as_slice()))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
