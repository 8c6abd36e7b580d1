//! Tool Executor
//!
//! Runs an approved [`Invocation`] through a shell, bounded by a timeout, and
//! captures stdout and stderr separately. Output is never truncated here.
//!
//! Every path yields an [`ExecutionResult`]: a process that cannot be spawned,
//! exits non-zero or runs past its timeout is reported in the result, not as an
//! error.

use super::shell::Invocation;
use super::timeout::{ExecutionTimedOut, ExecutionTimeout};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Shell used when an invocation has no override
#[cfg(unix)]
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Time between the polite and the forced kill of a timed-out process group
const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// How long output readers may keep going once the shell is gone
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Terminal state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The process ran to completion, whatever its exit status
    Completed,

    /// The process outlived the timeout and was killed
    TimedOut,

    /// The process could not be started
    SpawnFailed,
}

/// Why an execution did not succeed cleanly
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("Failed to start process: {0}")]
    Spawn(String),

    #[error(transparent)]
    TimedOut(#[from] ExecutionTimedOut),

    #[error("Command failed with exit code {0}")]
    NonZeroExit(i32),

    #[error("Command was terminated by a signal")]
    Terminated,

    #[error("Failed to wait for process: {0}")]
    Wait(String),
}

/// Result of running a command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Exit code (None if the process never exited on its own)
    pub exit_code: Option<i32>,

    /// Execution duration in milliseconds
    pub duration_ms: u64,

    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<ExecutionFailure>,
}

fn serialize_failure<S: Serializer>(
    failure: &Option<ExecutionFailure>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match failure {
        Some(failure) => serializer.serialize_some(&failure.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ExecutionResult {
    /// Result of a process that ran to completion
    pub fn completed(stdout: String, stderr: String, status: ExitStatus, elapsed: Duration) -> Self {
        let exit_code = status.code();
        let failure = match exit_code {
            Some(0) => None,
            Some(code) => Some(ExecutionFailure::NonZeroExit(code)),
            None => Some(ExecutionFailure::Terminated),
        };

        Self {
            outcome: ExecutionOutcome::Completed,
            stdout,
            stderr,
            exit_code,
            duration_ms: elapsed.as_millis() as u64,
            failure,
        }
    }

    /// Result of a process that was killed on timeout, with any partial output
    pub fn timed_out(
        stdout: String,
        stderr: String,
        timeout: ExecutionTimedOut,
        elapsed: Duration,
    ) -> Self {
        Self {
            outcome: ExecutionOutcome::TimedOut,
            stdout,
            stderr,
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
            failure: Some(timeout.into()),
        }
    }

    /// Result of a process that never started
    pub fn spawn_failed(description: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            outcome: ExecutionOutcome::SpawnFailed,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
            failure: Some(ExecutionFailure::Spawn(description.into())),
        }
    }

    /// Completed with exit code zero
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed && self.failure.is_none()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self.outcome {
            ExecutionOutcome::TimedOut => format!("Timeout after {}ms", self.duration_ms),
            ExecutionOutcome::SpawnFailed => format!("Spawn failed after {}ms", self.duration_ms),
            ExecutionOutcome::Completed if self.is_success() => format!(
                "Success (exit code: {:?}, {}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len()
            ),
            ExecutionOutcome::Completed => format!(
                "Failed (exit code: {:?}, {}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len() + self.stderr.len()
            ),
        }
    }
}

/// Something that can run an approved invocation
///
/// [`ExecutionEngine`] is the real implementation; tests substitute recorders.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &Invocation,
        working_dir: &Path,
        timeout: ExecutionTimeout,
    ) -> ExecutionResult;
}

/// Spawns invocations through the host shell
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    kill_grace: Duration,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Override the delay between SIGTERM and SIGKILL on timeout
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Execute an invocation in `working_dir`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use commandgate::tools::{ExecutionEngine, ExecutionTimeout, HostPlatform, ShellKind, ShellSelector};
    /// use std::path::Path;
    ///
    /// # async fn run() {
    /// let engine = ExecutionEngine::new();
    /// let invocation = ShellSelector::resolve(ShellKind::Auto, HostPlatform::current(), "echo hi");
    /// let result = engine.execute(&invocation, Path::new("."), ExecutionTimeout::from_secs(5)).await;
    /// assert!(result.stdout.contains("hi"));
    /// # }
    /// ```
    pub async fn execute(
        &self,
        invocation: &Invocation,
        working_dir: &Path,
        timeout: ExecutionTimeout,
    ) -> ExecutionResult {
        let start = Instant::now();
        info!(
            shell = invocation.shell_override.as_deref().unwrap_or("default"),
            cwd = %working_dir.display(),
            "Executing: {}",
            abbreviate(&invocation.command_line)
        );

        let mut process = build_command(invocation);
        process
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timeout can take down every descendant
        #[cfg(unix)]
        process.process_group(0);

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn process: {}", e);
                return ExecutionResult::spawn_failed(e.to_string(), start.elapsed());
            }
        };
        let pid = child.id();
        debug!(pid, "Process spawned");

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            tokio::spawn(drain(child.stdout.take(), Arc::clone(&stdout_buf))),
            tokio::spawn(drain(child.stderr.take(), Arc::clone(&stderr_buf))),
        ];

        // Completion is the shell exiting; a background job may keep the pipes open
        let waited = timeout.run(child.wait()).await;
        match &waited {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Failed to wait for process: {}", e);
                self.terminate(&mut child, pid).await;
            }
            Err(_) => {
                warn!("Command timed out after {:?}", timeout.duration());
                self.terminate(&mut child, pid).await;
            }
        }
        settle_readers(readers).await;

        match waited {
            Ok(Ok(status)) => {
                let result = ExecutionResult::completed(
                    take_text(&stdout_buf),
                    take_text(&stderr_buf),
                    status,
                    start.elapsed(),
                );
                if result.is_success() {
                    info!("Command succeeded: {}", result.summary());
                } else {
                    warn!("Command failed: {}", result.summary());
                }
                result
            }
            Ok(Err(e)) => ExecutionResult {
                outcome: ExecutionOutcome::Completed,
                stdout: take_text(&stdout_buf),
                stderr: take_text(&stderr_buf),
                exit_code: None,
                duration_ms: start.elapsed().as_millis() as u64,
                failure: Some(ExecutionFailure::Wait(e.to_string())),
            },
            Err(elapsed) => ExecutionResult::timed_out(
                take_text(&stdout_buf),
                take_text(&stderr_buf),
                elapsed,
                start.elapsed(),
            ),
        }
    }

    /// Kill the child and whatever descendants can be reached
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        #[cfg(unix)]
        if let Some(pid) = pid {
            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGTERM);
            tokio::time::sleep(self.kill_grace).await;
            let _ = killpg(pgid, Signal::SIGKILL);
        }

        #[cfg(windows)]
        if let Some(pid) = pid {
            let _ = TokioCommand::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }

        if let Err(e) = child.kill().await {
            debug!("Child already gone: {}", e);
        }
    }
}

#[async_trait]
impl CommandRunner for ExecutionEngine {
    async fn run(
        &self,
        invocation: &Invocation,
        working_dir: &Path,
        timeout: ExecutionTimeout,
    ) -> ExecutionResult {
        self.execute(invocation, working_dir, timeout).await
    }
}

#[cfg(unix)]
fn build_command(invocation: &Invocation) -> TokioCommand {
    let shell = invocation.shell_override.as_deref().unwrap_or(DEFAULT_SHELL);
    let mut process = TokioCommand::new(shell);
    process.arg("-c").arg(&invocation.command_line);
    process
}

#[cfg(windows)]
fn build_command(invocation: &Invocation) -> TokioCommand {
    match invocation.shell_override.as_deref() {
        Some(shell) => {
            let mut process = TokioCommand::new(shell);
            process.arg("-c").arg(&invocation.command_line);
            process
        }
        None => {
            let comspec = std::env::var("ComSpec").unwrap_or_else(|_| "cmd.exe".to_string());
            let mut process = TokioCommand::new(comspec);
            // Passed verbatim so cmd.exe sees the quotes exactly as resolved
            process
                .args(["/d", "/s", "/c"])
                .raw_arg(format!("\"{}\"", invocation.command_line));
            process
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, buf: Arc<Mutex<Vec<u8>>>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend_from_slice(&chunk[..n]),
        }
    }
}

/// Give the readers a bounded window to collect what is already in the pipes
async fn settle_readers(mut readers: [JoinHandle<()>; 2]) {
    let finished = tokio::time::timeout(OUTPUT_GRACE, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if finished.is_err() {
        debug!("Output pipes still held open by a descendant, detaching");
        for reader in &readers {
            reader.abort();
        }
    }
}

fn take_text(buf: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Shorten a command line for logs
fn abbreviate(command_line: &str) -> String {
    const MAX_LOGGED: usize = 120;
    if command_line.chars().count() > MAX_LOGGED {
        let head: String = command_line.chars().take(MAX_LOGGED).collect();
        format!("{}... ({} chars)", head, command_line.chars().count())
    } else {
        command_line.to_string()
    }
}
