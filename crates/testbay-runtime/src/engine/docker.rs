//! Container engine backed by the `docker` command line.
//!
//! Any CLI with the same surface (`podman`, `nerdctl`) works by pointing
//! the engine at a different binary.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use testbay_common::error::CommandFailure;
use testbay_common::types::NameFilter;
use tokio::process::Command;

use super::{ContainerEngine, RunSpec};
use crate::runner::{CommandRunner, within};

/// Engine that spawns the container CLI for every operation.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    runner: CommandRunner,
}

impl DockerCli {
    /// Creates an engine invoking `binary` with the given output bound.
    #[must_use]
    pub fn new(binary: impl Into<String>, max_output_bytes: usize) -> Self {
        Self {
            binary: binary.into(),
            runner: CommandRunner::new(max_output_bytes),
        }
    }

    /// Returns the configured binary.
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Returns whether the binary can be found on `PATH`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        let _ = cmd.args(args);
        cmd
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(
            testbay_common::constants::DEFAULT_ENGINE_BINARY,
            testbay_common::constants::DEFAULT_MAX_OUTPUT_BYTES,
        )
    }
}

/// Builds the argument list for `run`.
#[must_use]
pub fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-p".to_string(),
        format!("{}:{}", spec.host_port, spec.internal_port),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    if spec.detached {
        args.push("-d".to_string());
    }
    args.push(spec.image.clone());
    args
}

fn parse_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn run(&self, spec: &RunSpec, timeout: Duration) -> Result<(), CommandFailure> {
        tracing::info!(name = %spec.name, image = %spec.image, port = spec.host_port, "starting container");
        let _ = self
            .runner
            .run_checked(self.command(run_args(spec)), timeout)
            .await?;
        Ok(())
    }

    async fn exec(&self, name: &str, command: &str, timeout: Duration) -> Result<String, CommandFailure> {
        let output = self
            .runner
            .run_checked(self.command(["exec", name, "sh", "-c", command]), timeout)
            .await?;
        Ok(output.stdout)
    }

    async fn copy_into(
        &self,
        local: &Path,
        name: &str,
        remote_dir: &str,
        timeout: Duration,
    ) -> Result<(), CommandFailure> {
        let operation = format!("{} cp {} {name}:{remote_dir}", self.binary, local.display());
        within(timeout, &operation, async {
            let filter = NameFilter::Exact(name.to_string());
            let ids = self.list_running(&filter, timeout).await?;
            let Some(id) = ids.first() else {
                return Err(CommandFailure::NonZeroExit {
                    operation: operation.clone(),
                    status: "no running container".to_string(),
                    output: format!("no running container matches {filter}"),
                });
            };

            let mut cmd = Command::new(&self.binary);
            let _ = cmd
                .arg("cp")
                .arg(local)
                .arg(format!("{id}:{remote_dir}"));
            let _ = self.runner.run_checked(cmd, timeout).await?;
            tracing::debug!(%name, file = %local.display(), remote_dir, "copied file into container");
            Ok(())
        })
        .await
    }

    async fn stop(&self, filter: &NameFilter, timeout: Duration) -> Result<usize, CommandFailure> {
        let operation = format!("{} stop {filter}", self.binary);
        within(timeout, &operation, async {
            let ids = self.list_running(filter, timeout).await?;
            if ids.is_empty() {
                tracing::debug!(%filter, "no running containers to stop");
                return Ok(0);
            }

            let mut args = vec!["stop".to_string()];
            args.extend(ids.iter().cloned());
            let _ = self.runner.run_checked(self.command(args), timeout).await?;
            tracing::info!(%filter, count = ids.len(), "stopped containers");
            Ok(ids.len())
        })
        .await
    }

    async fn logs(&self, name: &str, timeout: Duration) -> Result<String, CommandFailure> {
        // A failing `logs` call still carries whatever the engine printed.
        let execution = self.runner.run(self.command(["logs", name]), timeout).await?;
        Ok(execution.output.combined())
    }

    async fn list_running(
        &self,
        filter: &NameFilter,
        timeout: Duration,
    ) -> Result<Vec<String>, CommandFailure> {
        let output = self
            .runner
            .run_checked(
                self.command([
                    "ps".to_string(),
                    "--filter".to_string(),
                    format!("name={}", filter.to_pattern()),
                    "--format".to_string(),
                    "{{.ID}}".to_string(),
                ]),
                timeout,
            )
            .await?;
        Ok(parse_ids(&output.stdout))
    }
}
