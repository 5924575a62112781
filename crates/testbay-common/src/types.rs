//! Domain primitive types used across the testbay workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a container managed by testbay.
///
/// Names built with [`ContainerName::namespaced`] carry the namespace prefix
/// so sweeps can find them again after a crash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    /// Creates a container name from a raw string, used as-is.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Builds `{prefix}{service}-{logical}`, e.g. `testbay-mysql-orders`.
    #[must_use]
    pub fn namespaced(prefix: &str, service: &str, logical: &str) -> Self {
        Self(format!("{prefix}{service}-{logical}"))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a filter matching exactly this container.
    #[must_use]
    pub fn exact_filter(&self) -> NameFilter {
        NameFilter::Exact(self.0.clone())
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name and host port of one ephemeral container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerIdentity {
    /// Unique container name.
    pub name: ContainerName,
    /// Host port published to the service's internal port.
    pub port: u16,
}

/// Selects containers by name.
///
/// Engines match names with a leading `/`, so both variants render as
/// anchored regular expressions; an exact filter never matches a different
/// container whose name merely shares a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameFilter {
    /// Matches exactly one name.
    Exact(String),
    /// Matches every name starting with the prefix.
    Prefix(String),
}

impl NameFilter {
    /// Renders the filter as the engine's `name=` regular expression.
    #[must_use]
    pub fn to_pattern(&self) -> String {
        match self {
            Self::Exact(name) => format!("^/{name}$"),
            Self::Prefix(prefix) => format!("^/{prefix}"),
        }
    }

    /// Returns whether `name` is selected by this filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let name = name.strip_prefix('/').unwrap_or(name);
        match self {
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for NameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_pattern())
    }
}

/// Lifecycle state of a container handle.
///
/// ```text
/// Created -> Launching -> SeedingData -> AwaitingReady -> Ready -> Running
///         -> CleaningUp -> Terminated
/// ```
///
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Handle constructed, nothing started.
    Created,
    /// Container start requested.
    Launching,
    /// Seed script being copied into the container.
    SeedingData,
    /// Polling for the ready marker.
    AwaitingReady,
    /// Ready marker observed and settle delay elapsed.
    Ready,
    /// Caller workload executing.
    Running,
    /// Container stop requested.
    CleaningUp,
    /// Container torn down.
    Terminated,
    /// A lifecycle step failed or the workload panicked.
    Failed,
}

impl LifecycleState {
    /// Returns `true` for `Terminated` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Launching => "launching",
            Self::SeedingData => "seeding",
            Self::AwaitingReady => "awaiting-ready",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::CleaningUp => "cleaning-up",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
