//! Separation engine invocation
//!
//! Launches the engine as a child process:
//!
//! ```text
//! <program> [args...] --config_path P1 --model_path P2 --input_folder P3 --store_dir P4
//! ```
//!
//! Only the exit status decides success. Output streams are read
//! incrementally, forwarded to the log, and retained as bounded tails for
//! diagnostics. A wall-clock timeout and a cancellation token both kill the
//! child and remove its output directory.

use futures::StreamExt;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use stemsplit_common::config::EngineConfig;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config_store::{self, ConfigStoreError};

/// Longest line kept before it is split; progress bars rewrite one line
/// with `\r` and never emit `\n`
const MAX_LINE_BYTES: usize = 4096;

/// How long to wait for the output readers once the child has exited
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Config store error: {0}")]
    Config(#[from] ConfigStoreError),

    #[error("Failed to launch engine: {0}")]
    Launch(std::io::Error),

    #[error("Failed waiting for engine: {0}")]
    Wait(std::io::Error),

    #[error("Engine timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Engine run cancelled")]
    Cancelled,
}

/// Static engine settings shared by every job
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub program: String,
    pub args: Vec<String>,
    pub config_path: PathBuf,
    pub model_path: PathBuf,
    pub timeout: Duration,
    pub capture_limit: usize,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            config_path: config.config_path.clone(),
            model_path: config.model_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            capture_limit: config.capture_limit_bytes,
        }
    }
}

/// Fully resolved command line of one engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub program: String,
    pub leading_args: Vec<String>,
    pub config_path: PathBuf,
    pub model_path: PathBuf,
    pub input_folder: PathBuf,
    pub store_dir: PathBuf,
}

impl EngineInvocation {
    /// Arguments after the program name, in launch order
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        args.push("--config_path".into());
        args.push(self.config_path.clone().into_os_string());
        args.push("--model_path".into());
        args.push(self.model_path.clone().into_os_string());
        args.push("--input_folder".into());
        args.push(self.input_folder.clone().into_os_string());
        args.push("--store_dir".into());
        args.push(self.store_dir.clone().into_os_string());
        args
    }

    /// Space-joined command line for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args().iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Captured result of a completed engine process
#[derive(Debug, Clone)]
pub struct EngineResult {
    /// Tail of standard output
    pub stdout: String,
    /// Tail of standard error
    pub stderr: String,
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl EngineResult {
    fn from_status(status: ExitStatus, stdout: OutputTail, stderr: OutputTail, elapsed: Duration) -> Self {
        Self {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code: status.code(),
            elapsed,
        }
    }

    /// Stderr output alone never makes a run unsuccessful
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A finished engine run plus the target instrument read before launch
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub target_instrument: String,
    pub result: EngineResult,
}

pub struct JobRunner {
    settings: EngineSettings,
}

impl JobRunner {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    /// Resolve absolute paths for one run
    pub fn invocation(&self, input_folder: &Path, store_dir: &Path) -> std::io::Result<EngineInvocation> {
        Ok(EngineInvocation {
            program: self.settings.program.clone(),
            leading_args: self.settings.args.clone(),
            config_path: std::path::absolute(&self.settings.config_path)?,
            model_path: std::path::absolute(&self.settings.model_path)?,
            input_folder: std::path::absolute(input_folder)?,
            store_dir: std::path::absolute(store_dir)?,
        })
    }

    /// Run the engine over `input_folder`, writing stems into `store_dir`
    ///
    /// `store_dir` must already exist. A nonzero exit is returned as an
    /// `EngineResult`, not an error; errors mean the run never completed.
    pub async fn run(
        &self,
        job_id: Uuid,
        input_folder: &Path,
        store_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<EngineRun, RunError> {
        let invocation = self
            .invocation(input_folder, store_dir)
            .map_err(RunError::Launch)?;

        // Diagnostics only; a missing path shows up later as an engine failure
        check_path(job_id, "config", &invocation.config_path).await;
        check_path(job_id, "model", &invocation.model_path).await;
        for arg in invocation.leading_args.iter().filter(|a| !a.starts_with('-')) {
            check_path(job_id, "engine argument", Path::new(arg)).await;
        }
        check_path(job_id, "input folder", &invocation.input_folder).await;
        check_path(job_id, "output folder", &invocation.store_dir).await;

        let target_instrument = config_store::load_target_instrument(&invocation.config_path)
            .await
            .map_err(|e| {
                error!(job_id = %job_id, error = %e, "Error loading config store");
                e
            })?;
        debug!(job_id = %job_id, target_instrument = %target_instrument, "Loaded config store");

        info!(
            job_id = %job_id,
            command = %invocation.command_line(),
            "Launching separation engine"
        );

        let started = Instant::now();
        let mut child = invocation.command().spawn().map_err(RunError::Launch)?;
        let limit = self.settings.capture_limit;
        let mut stdout_task = child
            .stdout
            .take()
            .map(|s| spawn_capture(s, job_id, "stdout", limit));
        let mut stderr_task = child
            .stderr
            .take()
            .map(|s| spawn_capture(s, job_id, "stderr", limit));

        let finish = tokio::select! {
            status = child.wait() => Finish::Exited(status),
            _ = tokio::time::sleep(self.settings.timeout) => Finish::TimedOut,
            _ = cancel.cancelled() => Finish::Cancelled,
        };

        let status = match finish {
            Finish::Exited(status) => status.map_err(RunError::Wait)?,
            Finish::TimedOut => {
                warn!(job_id = %job_id, timeout = ?self.settings.timeout, "Engine exceeded time limit, killing");
                abort_run(job_id, &mut child, [stdout_task, stderr_task], &invocation.store_dir).await;
                return Err(RunError::TimedOut(self.settings.timeout));
            }
            Finish::Cancelled => {
                warn!(job_id = %job_id, "Job cancelled, killing engine");
                abort_run(job_id, &mut child, [stdout_task, stderr_task], &invocation.store_dir).await;
                return Err(RunError::Cancelled);
            }
        };

        let stdout = drain_capture(stdout_task.as_mut(), limit).await;
        let stderr = drain_capture(stderr_task.as_mut(), limit).await;
        let result = EngineResult::from_status(status, stdout, stderr, started.elapsed());

        info!(
            job_id = %job_id,
            exit_code = ?result.exit_code,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Separation engine exited"
        );

        Ok(EngineRun {
            target_instrument,
            result,
        })
    }
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Kill the child, stop the readers and remove partial outputs
async fn abort_run(
    job_id: Uuid,
    child: &mut Child,
    captures: [Option<JoinHandle<OutputTail>>; 2],
    store_dir: &Path,
) {
    if let Err(e) = child.kill().await {
        error!(job_id = %job_id, error = %e, "Failed to kill engine process");
    }
    for task in captures.into_iter().flatten() {
        task.abort();
    }
    match tokio::fs::remove_dir_all(store_dir).await {
        Ok(()) => debug!(job_id = %job_id, "Removed partial outputs at {}", store_dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove partial outputs at {}", store_dir.display()),
    }
}

async fn drain_capture(task: Option<&mut JoinHandle<OutputTail>>, limit: usize) -> OutputTail {
    let Some(task) = task else {
        return OutputTail::new(limit);
    };
    match tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, &mut *task).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            warn!(error = %e, "Engine output reader failed");
            OutputTail::new(limit)
        }
        Err(_) => {
            // A grandchild still holds the pipe open
            task.abort();
            warn!("Engine output still open after exit, capture truncated");
            OutputTail::new(limit)
        }
    }
}

/// Log whether `path` exists and is readable
async fn check_path(job_id: Uuid, label: &str, path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            let readable = if metadata.is_dir() {
                tokio::fs::read_dir(path).await.is_ok()
            } else {
                tokio::fs::File::open(path).await.is_ok()
            };
            if readable {
                debug!(job_id = %job_id, "{} exists and is readable: {}", label, path.display());
            } else {
                warn!(job_id = %job_id, "{} is not readable: {}", label, path.display());
            }
        }
        Err(_) => {
            error!(job_id = %job_id, "{} does not exist: {}", label, path.display());
        }
    }
}

fn spawn_capture<R>(stream: R, job_id: Uuid, name: &'static str, limit: usize) -> JoinHandle<OutputTail>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = OutputTail::new(limit);
        let mut lines = FramedRead::new(stream, EngineLineCodec::default());
        while let Some(line) = lines.next().await {
            match line {
                Ok(text) => {
                    debug!(job_id = %job_id, stream = name, "{}", text);
                    tail.push(text);
                }
                Err(e) => {
                    warn!(job_id = %job_id, stream = name, error = %e, "Failed reading engine output");
                    break;
                }
            }
        }
        tail
    })
}

/// Splits engine output into lines at `\n` or `\r`
///
/// Empty lines are skipped, lines longer than `MAX_LINE_BYTES` are cut, and
/// bytes that are not UTF-8 are replaced.
#[derive(Debug, Default)]
struct EngineLineCodec {
    /// Prefix of the buffer already searched for a line end
    scanned: usize,
}

impl Decoder for EngineLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            let window = buf.len().min(MAX_LINE_BYTES);
            let line_end = buf[self.scanned..window]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r');
            let line = match line_end {
                Some(offset) => {
                    let line = buf.split_to(self.scanned + offset);
                    buf.advance(1);
                    line
                }
                None if buf.len() >= MAX_LINE_BYTES => buf.split_to(MAX_LINE_BYTES),
                None => {
                    self.scanned = buf.len();
                    return Ok(None);
                }
            };
            self.scanned = 0;
            if !line.is_empty() {
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

/// Most recent lines of a stream within a byte budget
#[derive(Debug, Default)]
pub struct OutputTail {
    lines: VecDeque<String>,
    bytes: usize,
    limit: usize,
    dropped: usize,
}

impl OutputTail {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.limit {
            match self.lines.pop_front() {
                Some(old) => {
                    self.bytes -= old.len() + 1;
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    /// Number of lines evicted to stay within the budget
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_string(self) -> String {
        let body = self.lines.into_iter().collect::<Vec<_>>().join("\n");
        if self.dropped > 0 {
            format!("[{} earlier lines omitted]\n{}", self.dropped, body)
        } else {
            body
        }
    }
}
