//! Builder for running external tools with a timeout, line-by-line stderr
//! streaming and cooperative cancellation.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use fanout_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Lines of stderr kept for error messages when streaming.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). When streamed, only the tail.
    pub stderr: String,
}

/// A builder for external tool invocations.
///
/// ```no_run
/// use fanout_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> fanout_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "quiet", "-print_format", "json", "-show_format"])
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
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
        self.timeout = Some(d);
        self
    }

    /// Let the process run as long as it needs. Cancellation still applies.
    pub fn no_timeout(&mut self) -> &mut Self {
        self.timeout = None;
        self
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// [`Error::Tool`] when spawning fails, the timeout expires or the
    /// process exits non-zero (the message carries stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let tool = self.program_name();
        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::tool(&tool, format!("timed out after {limit:?}")))?,
            None => child.wait_with_output().await,
        };
        let output =
            waited.map_err(|e| Error::tool(&tool, format!("I/O error waiting for process: {e}")))?;

        let result = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        if !result.status.success() {
            return Err(Error::tool(
                tool,
                format!("exited with status {}: {}", result.status, result.stderr.trim()),
            ));
        }
        Ok(result)
    }

    /// Execute the command, handing each stderr line to `on_line` as it
    /// arrives.
    ///
    /// ffmpeg writes `-progress pipe:2` blocks to stderr, so this is the
    /// frame-batch checkpoint: cancellation is observed between lines and
    /// kills the child.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when `cancel` fires, otherwise as [`execute`].
    ///
    /// [`execute`]: ToolCommand::execute
    pub async fn execute_with_stderr_callback(
        &self,
        mut on_line: impl FnMut(&str),
        cancel: Option<&CancellationToken>,
    ) -> Result<ToolOutput> {
        let tool = self.program_name();
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let stdout_task = child.stdout.take().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(&tool, "stderr was not captured"))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        let deadline = self.timeout.map(|d| tokio::time::Instant::now() + d);
        let sleep_until = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(sleep_until);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    tracing::debug!(tool = %tool, "process cancelled");
                    return Err(Error::Cancelled);
                }
                _ = &mut sleep_until => {
                    let _ = child.kill().await;
                    return Err(Error::tool(
                        &tool,
                        format!("timed out after {:?}", self.timeout.unwrap_or_default()),
                    ));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(tool = %tool, error = %e, "stderr read failed");
                        break;
                    }
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            status = child.wait() => {
                status.map_err(|e| Error::tool(&tool, format!("I/O error waiting for process: {e}")))?
            }
        };

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = tail.into_iter().collect::<Vec<_>>().join("\n");
        if !status.success() {
            return Err(Error::tool(
                tool,
                format!("exited with status {status}: {}", stderr.trim()),
            ));
        }
        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr,
        })
    }
}
