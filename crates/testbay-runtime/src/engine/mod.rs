//! Container engine abstraction.
//!
//! The lifecycle only ever talks to a [`ContainerEngine`]. The default
//! implementation, [`DockerCli`](docker::DockerCli), shells out to the
//! engine binary; tests substitute an in-memory engine.

pub mod docker;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use testbay_common::error::CommandFailure;
use testbay_common::types::NameFilter;

pub use docker::DockerCli;

/// Parameters for starting one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Host port published on the loopback side.
    pub host_port: u16,
    /// Port the service listens on inside the container.
    pub internal_port: u16,
    /// Environment passed to the container.
    pub env: Vec<(String, String)>,
    /// Run in the background.
    pub detached: bool,
}

/// Container engine operations the lifecycle depends on.
///
/// Every operation takes an explicit deadline. Name filters must be
/// anchored so one container's operations never hit another.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Starts a container. The container is removed when it stops.
    ///
    /// # Errors
    ///
    /// Returns the failing command if the engine rejects the container.
    async fn run(&self, spec: &RunSpec, timeout: Duration) -> Result<(), CommandFailure>;

    /// Runs a shell command inside a running container.
    ///
    /// # Errors
    ///
    /// Returns the failing command on non-zero exit or timeout.
    async fn exec(&self, name: &str, command: &str, timeout: Duration) -> Result<String, CommandFailure>;

    /// Copies a local file into a directory of a running container.
    ///
    /// # Errors
    ///
    /// Returns the failing command if the container is not running or the copy fails.
    async fn copy_into(
        &self,
        local: &Path,
        name: &str,
        remote_dir: &str,
        timeout: Duration,
    ) -> Result<(), CommandFailure>;

    /// Stops every running container matching `filter`, returning how many.
    ///
    /// Matching nothing is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns the failing command if listing or stopping fails.
    async fn stop(&self, filter: &NameFilter, timeout: Duration) -> Result<usize, CommandFailure>;

    /// Returns the container's combined log output.
    ///
    /// # Errors
    ///
    /// Returns the failing command if logs cannot be retrieved.
    async fn logs(&self, name: &str, timeout: Duration) -> Result<String, CommandFailure>;

    /// Lists the IDs of running containers matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the failing command if the listing fails.
    async fn list_running(
        &self,
        filter: &NameFilter,
        timeout: Duration,
    ) -> Result<Vec<String>, CommandFailure>;
}
