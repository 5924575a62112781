//! Runs external commands with a hard timeout and bounded output capture.
//!
//! Every engine operation goes through [`CommandRunner::run`]. The child is
//! spawned with `kill_on_drop`, so when the deadline wins the race the
//! process is killed instead of being left running in the background.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use testbay_common::error::CommandFailure;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// How a command execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit status zero.
    Success,
    /// Non-zero exit or termination by signal.
    NonZeroExit {
        /// Exit status description.
        status: String,
    },
    /// The deadline elapsed first; the child was killed.
    TimedOut,
}

/// Captured output streams, each truncated to the runner's buffer size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CapturedOutput {
    /// Stdout followed by stderr, for diagnostics and log retrieval.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Record of one command run. Created per step and discarded afterwards.
#[derive(Debug, Clone)]
pub struct CommandExecution {
    /// Rendered command line.
    pub operation: String,
    /// Deadline the command ran under.
    pub timeout: Duration,
    /// Captured output (empty on timeout).
    pub output: CapturedOutput,
    /// How the command ended.
    pub outcome: Outcome,
}

impl CommandExecution {
    /// Converts the execution into the captured output or a typed failure.
    ///
    /// # Errors
    ///
    /// Returns [`CommandFailure::NonZeroExit`] or [`CommandFailure::TimedOut`]
    /// for the corresponding outcomes.
    pub fn into_result(self) -> Result<CapturedOutput, CommandFailure> {
        match self.outcome {
            Outcome::Success => Ok(self.output),
            Outcome::NonZeroExit { status } => Err(CommandFailure::NonZeroExit {
                operation: self.operation,
                status,
                output: self.output.combined(),
            }),
            Outcome::TimedOut => Err(CommandFailure::TimedOut {
                operation: self.operation,
                timeout: self.timeout,
            }),
        }
    }
}

/// Executes commands under a deadline.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    max_output_bytes: usize,
}

impl CommandRunner {
    /// Creates a runner that keeps at most `max_output_bytes` per stream.
    #[must_use]
    pub const fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Runs `command`, racing its completion against `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandFailure::Spawn`] if the process could not be started
    /// or waited on. Non-zero exits and timeouts are reported through
    /// [`CommandExecution::outcome`].
    pub async fn run(
        &self,
        mut command: Command,
        timeout: Duration,
    ) -> Result<CommandExecution, CommandFailure> {
        let operation = describe(&command);
        let _ = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(%operation, timeout_ms = timeout.as_millis(), "running command");
        let mut child = command.spawn().map_err(|source| CommandFailure::Spawn {
            operation: operation.clone(),
            source,
        })?;

        let max = self.max_output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = async {
            let (stdout, stderr, status) =
                tokio::join!(capture(stdout, max), capture(stderr, max), child.wait());
            Ok::<_, std::io::Error>((stdout?, stderr?, status?))
        };

        match tokio::time::timeout(timeout, finished).await {
            Err(_) => {
                tracing::warn!(%operation, timeout_ms = timeout.as_millis(), "command timed out, killed");
                Ok(CommandExecution {
                    operation,
                    timeout,
                    output: CapturedOutput::default(),
                    outcome: Outcome::TimedOut,
                })
            }
            Ok(Err(source)) => Err(CommandFailure::Spawn { operation, source }),
            Ok(Ok((stdout, stderr, status))) => {
                let outcome = if status.success() {
                    Outcome::Success
                } else {
                    Outcome::NonZeroExit {
                        status: status.to_string(),
                    }
                };
                tracing::debug!(%operation, ?outcome, "command finished");
                Ok(CommandExecution {
                    operation,
                    timeout,
                    output: CapturedOutput { stdout, stderr },
                    outcome,
                })
            }
        }
    }

    /// Runs `command` and converts the outcome with [`CommandExecution::into_result`].
    ///
    /// # Errors
    ///
    /// Returns any spawn, non-zero exit or timeout failure.
    pub async fn run_checked(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<CapturedOutput, CommandFailure> {
        self.run(command, timeout).await?.into_result()
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(testbay_common::constants::DEFAULT_MAX_OUTPUT_BYTES)
    }
}

/// Renders a command as `program arg1 arg2` for logs and errors.
#[must_use]
pub fn describe(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bounds a multi-command operation by a single deadline.
///
/// Engine operations that run several commands pass the same `timeout` to
/// each of them; this caps their sum. On expiry the in-flight child is
/// dropped, and with it killed.
///
/// # Errors
///
/// Returns the operation's own failure, or [`CommandFailure::TimedOut`]
/// naming `operation` once `timeout` has elapsed.
pub async fn within<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T, CommandFailure>
where
    F: Future<Output = Result<T, CommandFailure>>,
{
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        Err(CommandFailure::TimedOut {
            operation: operation.to_string(),
            timeout,
        })
    })
}

/// Keeps at most `max` bytes of a stream and discards the rest unread into memory.
async fn capture<R>(reader: Option<R>, max: usize) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };
    let mut kept = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX);
    let _ = (&mut reader).take(limit).read_to_end(&mut kept).await?;
    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(bounded(&kept, dropped > 0))
}

fn bounded(kept: &[u8], truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(kept).into_owned();
    if truncated {
        // The cut may have split a multi-byte character.
        if text.ends_with(char::REPLACEMENT_CHARACTER) {
            let _ = text.pop();
        }
        text.push_str("\n... [output truncated]");
    }
    text
}
