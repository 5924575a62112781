//! Unified error types for the testbay workspace.
//!
//! [`CommandFailure`] describes a single external operation that went wrong;
//! [`TestbayError`] is what a lifecycle sequence hands back to its caller.
//! Container log output is folded into the message text rather than carried
//! as structured data.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a single external command did not succeed.
#[derive(Debug, Error)]
pub enum CommandFailure {
    /// The command could not be started at all.
    #[error("failed to spawn `{operation}`: {source}")]
    Spawn {
        /// Rendered command line.
        operation: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("`{operation}` exited with {status}{}", format_output(.output))]
    NonZeroExit {
        /// Rendered command line.
        operation: String,
        /// Exit status description, e.g. `exit status: 1`.
        status: String,
        /// Captured stderr/stdout, possibly truncated.
        output: String,
    },

    /// The command did not finish before its deadline and was killed.
    #[error("`{operation}` timed out after {}s", .timeout.as_secs())]
    TimedOut {
        /// Rendered command line.
        operation: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

impl CommandFailure {
    /// Returns `true` if the failure is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TestbayError {
    /// Every port offered by the OS had already been handed out.
    #[error("no free port found after {attempts} attempts")]
    PortAllocationExhausted {
        /// Number of probes made.
        attempts: usize,
    },

    /// Binding the loopback probe socket failed.
    #[error("failed to probe for a free port: {source}")]
    PortProbe {
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Starting the container failed.
    #[error("failed to launch container {name}: {source}{}", format_logs(.logs))]
    LaunchFailed {
        /// Container name.
        name: String,
        /// Failing engine command.
        source: CommandFailure,
        /// Container log output captured after the failure.
        logs: String,
    },

    /// The seed script could not be assembled or written.
    #[error("failed to write seed data {}: {source}", .path.display())]
    SeedWriteFailed {
        /// File that could not be read or written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Copying the seed script into the container failed.
    #[error("failed to copy seed data into container {name}: {source}{}", format_logs(.logs))]
    SeedCopyFailed {
        /// Container name.
        name: String,
        /// Failing engine command.
        source: CommandFailure,
        /// Container log output captured after the failure.
        logs: String,
    },

    /// The ready marker was not observed before the step deadline.
    #[error(
        "container {name} was not ready after {}s{}",
        .timeout.as_secs(),
        format_logs(.logs)
    )]
    ReadinessTimeout {
        /// Container name.
        name: String,
        /// Step deadline that elapsed.
        timeout: Duration,
        /// Container log output captured after the failure.
        logs: String,
    },

    /// The readiness probe could not be executed at all.
    #[error("readiness probe for container {name} failed: {source}{}", format_logs(.logs))]
    ReadinessProbe {
        /// Container name.
        name: String,
        /// Failing engine command.
        source: CommandFailure,
        /// Container log output captured after the failure.
        logs: String,
    },

    /// The caller's workload returned an error; passed through untouched.
    #[error(transparent)]
    Workload(Box<dyn std::error::Error + Send + Sync>),

    /// Stopping a container failed. Only ever logged.
    #[error("failed to clean up container {name}: {source}")]
    CleanupFailed {
        /// Container name or filter.
        name: String,
        /// Failing engine command.
        source: CommandFailure,
    },

    /// An I/O operation failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl TestbayError {
    /// Returns the workload's own error if this is a pass-through.
    #[must_use]
    pub fn as_workload(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Workload(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Returns the captured container logs attached to this error, if any.
    #[must_use]
    pub fn container_logs(&self) -> Option<&str> {
        match self {
            Self::LaunchFailed { logs, .. }
            | Self::SeedCopyFailed { logs, .. }
            | Self::ReadinessTimeout { logs, .. }
            | Self::ReadinessProbe { logs, .. }
                if !logs.trim().is_empty() =>
            {
                Some(logs.as_str())
            }
            _ => None,
        }
    }
}

fn format_logs(logs: &str) -> String {
    if logs.trim().is_empty() {
        String::new()
    } else {
        format!("\n -- CONTAINER LOGS -- \n{}", logs.trim_end())
    }
}

fn format_output(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        String::new()
    } else {
        format!(" -- {output}")
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TestbayError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn non_zero() -> CommandFailure {
        CommandFailure::NonZeroExit {
            operation: "docker run".into(),
            status: "exit status: 125".into(),
            output: "port is already allocated\n".into(),
        }
    }

    #[test]
    fn non_zero_exit_includes_captured_output() {
        let msg = non_zero().to_string();
        assert_eq!(
            msg,
            "`docker run` exited with exit status: 125 -- port is already allocated"
        );
    }

    #[test]
    fn launch_failure_embeds_container_logs() {
        let err = TestbayError::LaunchFailed {
            name: "testbay-mysql-a".into(),
            source: non_zero(),
            logs: "ERROR 1064 (42000) at line 1\n".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("-- CONTAINER LOGS --"));
        assert!(msg.ends_with("ERROR 1064 (42000) at line 1"));
        assert_eq!(err.container_logs(), Some("ERROR 1064 (42000) at line 1\n"));
    }

    #[test]
    fn empty_logs_are_omitted() {
        let err = TestbayError::ReadinessTimeout {
            name: "testbay-mysql-a".into(),
            timeout: Duration::from_secs(60),
            logs: "  \n".into(),
        };
        assert_eq!(err.to_string(), "container testbay-mysql-a was not ready after 60s");
        assert!(err.container_logs().is_none());
    }

    #[test]
    fn workload_error_is_transparent() {
        let err = TestbayError::Workload("row count mismatch".into());
        assert_eq!(err.to_string(), "row count mismatch");
        assert!(err.as_workload().is_some());
    }

    #[test]
    fn timed_out_is_timeout() {
        let failure = CommandFailure::TimedOut {
            operation: "docker exec".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(failure.is_timeout());
        assert!(!non_zero().is_timeout());
    }
}
