//! Global configuration model for testbay.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, TestbayError};

/// Root configuration shared by every lifecycle in a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbayConfig {
    /// Namespace prefix for container and temp-file names.
    pub prefix: String,
    /// Container engine binary.
    pub engine_binary: String,
    /// Timeout applied to each lifecycle step.
    pub step_timeout_secs: u64,
    /// Interval between readiness probes.
    pub poll_interval_ms: u64,
    /// Delay after the ready marker appears before the workload runs.
    pub settle_delay_ms: u64,
    /// Upper bound on the startup sweep wait.
    pub sweep_timeout_secs: u64,
    /// Bounded buffer size for captured command output.
    pub max_output_bytes: usize,
    /// Directory seed scripts are written to.
    pub temp_dir: PathBuf,
    /// Base directory relative seed file paths are resolved against.
    pub seed_root: PathBuf,
    /// Whether to register the termination signal sweep.
    pub handle_signals: bool,
}

impl Default for TestbayConfig {
    fn default() -> Self {
        Self {
            prefix: constants::NAMESPACE_PREFIX.to_string(),
            engine_binary: constants::DEFAULT_ENGINE_BINARY.to_string(),
            step_timeout_secs: constants::DEFAULT_STEP_TIMEOUT_SECS,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            settle_delay_ms: constants::DEFAULT_SETTLE_DELAY_MS,
            sweep_timeout_secs: constants::DEFAULT_SWEEP_TIMEOUT_SECS,
            max_output_bytes: constants::DEFAULT_MAX_OUTPUT_BYTES,
            temp_dir: std::env::temp_dir(),
            seed_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            handle_signals: true,
        }
    }
}

impl TestbayConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TestbayError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `TESTBAY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("TESTBAY_PREFIX") {
            self.prefix = v;
        }
        if let Some(v) = get("TESTBAY_ENGINE") {
            self.engine_binary = v;
        }
        if let Some(v) = get("TESTBAY_STEP_TIMEOUT_SECS") {
            self.step_timeout_secs = parse_var("TESTBAY_STEP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TESTBAY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_var("TESTBAY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("TESTBAY_SETTLE_DELAY_MS") {
            self.settle_delay_ms = parse_var("TESTBAY_SETTLE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("TESTBAY_SWEEP_TIMEOUT_SECS") {
            self.sweep_timeout_secs = parse_var("TESTBAY_SWEEP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TESTBAY_SEED_ROOT") {
            self.seed_root = PathBuf::from(v);
        }
        if let Some(v) = get("TESTBAY_HANDLE_SIGNALS") {
            self.handle_signals = parse_var("TESTBAY_HANDLE_SIGNALS", &v)?;
        }
        self.validate()
    }

    /// Checks invariants the lifecycle relies on.
    ///
    /// # Errors
    ///
    /// Returns [`TestbayError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(TestbayError::Config {
                message: "prefix must not be empty".into(),
            });
        }
        if self.step_timeout_secs == 0 {
            return Err(TestbayError::Config {
                message: "step_timeout_secs must be greater than zero".into(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(TestbayError::Config {
                message: "poll_interval_ms must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Per-step timeout.
    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Readiness poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Settle delay after the ready marker.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Startup sweep wait bound.
    #[must_use]
    pub const fn sweep_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| TestbayError::Config {
        message: format!("{key} has invalid value {value:?}"),
    })
}
