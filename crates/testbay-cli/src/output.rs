//! Formatting helpers for CLI messages.

use std::process::ExitStatus;
use std::time::Duration;

/// Formats an elapsed duration, e.g. `850ms` or `12.3s`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Describes how a child process ended.
#[must_use]
pub fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(0) => "succeeded".to_string(),
        Some(code) => format!("failed with exit code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}
