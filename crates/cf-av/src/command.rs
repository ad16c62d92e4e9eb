//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Default command timeout: 2 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Classified result of running one external process.
///
/// The runner never decides whether a non-zero exit is fatal; that is left to
/// the caller.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The process ran and is gone.
    Completed {
        /// Exit code, or `None` if the process was terminated by a signal or
        /// its status could not be collected.
        exit_code: Option<i32>,
        /// Captured standard output followed by standard error (lossy UTF-8).
        output: String,
    },
    /// The process outlived its timeout and was killed.
    TimedOut,
    /// The process could not be started (missing binary, permission denied).
    /// Never used once the process is running.
    LaunchFailed(std::io::Error),
}

impl ExecutionOutcome {
    /// Whether the process completed with exit code zero.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Completed {
                exit_code: Some(0),
                ..
            }
        )
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use cf_av::{ExecutionOutcome, ToolCommand};
/// use std::path::PathBuf;
///
/// # async fn example() {
/// let outcome = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-version")
///     .run()
///     .await;
/// if let ExecutionOutcome::Completed { output, .. } = outcome {
///     println!("{output}");
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Short program name used in logs and errors.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The command line as a single string, for logging.
    pub fn render(&self) -> String {
        let mut rendered = self.program.to_string_lossy().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    /// Run the command to completion, or until the timeout expires.
    ///
    /// Standard output and standard error are captured concurrently and
    /// merged into one diagnostic string. On timeout the child is killed and
    /// reaped before this returns, so no process outlives the call.
    pub async fn run(&self) -> ExecutionOutcome {
        let program_name = self.program_name();
        tracing::debug!("exec: {}", self.render());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("{program_name}: failed to spawn: {e}");
                return ExecutionOutcome::LaunchFailed(e);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let capture = tokio::spawn(async move {
            let (out, err) = tokio::join!(read_all(stdout), read_all(stderr));
            let mut merged = out;
            merged.push_str(&err);
            merged
        });

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let output = capture.await.unwrap_or_default();
                tracing::trace!("{program_name} output:\n{output}");
                ExecutionOutcome::Completed {
                    exit_code: status.code(),
                    output,
                }
            }
            Ok(Err(e)) => {
                // The process did start; waiting on it failed. Make sure it is gone.
                let _ = child.kill().await;
                capture.abort();
                tracing::error!("{program_name}: I/O error waiting for process: {e}");
                wait_failed(&program_name, &e)
            }
            Err(_elapsed) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("{program_name}: failed to kill after timeout: {e}");
                }
                capture.abort();
                tracing::error!("{program_name}: timed out after {:?}", self.timeout);
                ExecutionOutcome::TimedOut
            }
        }
    }
}

/// Outcome for a process that started but could not be waited on. Its exit
/// status is unknown, so it is reported as completed without a code.
fn wait_failed(program_name: &str, e: &std::io::Error) -> ExecutionOutcome {
    ExecutionOutcome::Completed {
        exit_code: None,
        output: format!("{program_name}: failed to wait for process: {e}"),
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}
