//! In-memory container engine for tests.
//!
//! [`FakeEngine`] records every call, keeps a set of "running" names and
//! captures seed scripts at copy time. A readiness probe succeeds once the
//! container is running, a seed script has been copied in and the
//! configured number of probe failures has been used up.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use testbay_common::error::CommandFailure;
use testbay_common::types::NameFilter;

use crate::engine::{ContainerEngine, RunSpec};

/// Engine operation kinds, used to inject failures and hangs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `run`
    Run,
    /// `exec`
    Exec,
    /// `copy_into`
    Copy,
    /// `stop`
    Stop,
    /// `logs`
    Logs,
    /// `list_running`
    List,
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// Container start.
    Run {
        /// Container name.
        name: String,
        /// Published host port.
        host_port: u16,
    },
    /// In-container command.
    Exec {
        /// Container name.
        name: String,
        /// Whether the probe saw the ready marker.
        ready: bool,
    },
    /// Seed copy.
    Copy {
        /// Container name.
        name: String,
        /// Target directory.
        remote_dir: String,
    },
    /// Stop by filter.
    Stop(NameFilter),
    /// Log retrieval.
    Logs(String),
    /// Listing by filter.
    List(NameFilter),
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<EngineCall>,
    running: BTreeSet<String>,
    sticky: BTreeSet<String>,
    seeds: HashMap<String, String>,
    probe_failures: usize,
    failing: HashSet<Operation>,
    hanging: HashSet<Operation>,
    logs: String,
}

/// In-memory [`ContainerEngine`].
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    /// Creates an engine with no running containers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the first `n` readiness probes fail.
    #[must_use]
    pub fn with_probe_failures(self, n: usize) -> Self {
        self.lock().probe_failures = n;
        self
    }

    /// Makes every call of `op` exit non-zero.
    #[must_use]
    pub fn failing(self, op: Operation) -> Self {
        let _ = self.lock().failing.insert(op);
        self
    }

    /// Makes every call of `op` never return.
    #[must_use]
    pub fn hanging(self, op: Operation) -> Self {
        let _ = self.lock().hanging.insert(op);
        self
    }

    /// Sets the text returned by `logs`.
    #[must_use]
    pub fn with_logs(self, logs: impl Into<String>) -> Self {
        self.lock().logs = logs.into();
        self
    }

    /// Pretends a container is already running, e.g. left over from a crash.
    #[must_use]
    pub fn with_running(self, name: impl Into<String>) -> Self {
        let _ = self.lock().running.insert(name.into());
        self
    }

    /// Pretends a container ignores stop requests.
    #[must_use]
    pub fn with_sticky(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut state = self.lock();
        let _ = state.running.insert(name.clone());
        let _ = state.sticky.insert(name);
        drop(state);
        self
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Names of containers currently running.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.lock().running.iter().cloned().collect()
    }

    /// Returns whether `name` is running.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.lock().running.contains(name)
    }

    /// The seed script copied into `name`, if any.
    #[must_use]
    pub fn seed_script(&self, name: &str) -> Option<String> {
        self.lock().seeds.get(name).cloned()
    }

    /// Calls made after the first `Run` of `name`.
    #[must_use]
    pub fn calls_after_launch(&self, name: &str) -> Vec<EngineCall> {
        self.lock()
            .calls
            .iter()
            .skip_while(|call| !matches!(call, EngineCall::Run { name: n, .. } if n == name))
            .skip(1)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call, then hangs or fails if configured to.
    async fn enter(&self, op: Operation, call: EngineCall) -> Result<(), CommandFailure> {
        let (hang, fail) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.hanging.contains(&op), state.failing.contains(&op))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(failure(op, "injected failure"));
        }
        Ok(())
    }
}

fn failure(op: Operation, output: &str) -> CommandFailure {
    CommandFailure::NonZeroExit {
        operation: format!("fake {op:?}").to_lowercase(),
        status: "exit status: 1".into(),
        output: output.into(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn run(&self, spec: &RunSpec, _timeout: Duration) -> Result<(), CommandFailure> {
        self.enter(
            Operation::Run,
            EngineCall::Run {
                name: spec.name.clone(),
                host_port: spec.host_port,
            },
        )
        .await?;
        let mut state = self.lock();
        if !state.running.insert(spec.name.clone()) {
            return Err(failure(Operation::Run, "container name already in use"));
        }
        Ok(())
    }

    async fn exec(&self, name: &str, _command: &str, _timeout: Duration) -> Result<String, CommandFailure> {
        let ready = {
            let mut state = self.lock();
            let seeded = state.running.contains(name) && state.seeds.contains_key(name);
            let ready = seeded && state.probe_failures == 0;
            if seeded && !ready {
                state.probe_failures -= 1;
            }
            ready
        };
        self.enter(
            Operation::Exec,
            EngineCall::Exec {
                name: name.to_string(),
                ready,
            },
        )
        .await?;
        if ready {
            Ok("initialization table found\n".into())
        } else {
            Err(failure(Operation::Exec, "ready marker not found"))
        }
    }

    async fn copy_into(
        &self,
        local: &Path,
        name: &str,
        remote_dir: &str,
        _timeout: Duration,
    ) -> Result<(), CommandFailure> {
        self.enter(
            Operation::Copy,
            EngineCall::Copy {
                name: name.to_string(),
                remote_dir: remote_dir.to_string(),
            },
        )
        .await?;
        let script = std::fs::read_to_string(local).map_err(|source| CommandFailure::Spawn {
            operation: format!("fake copy {}", local.display()),
            source,
        })?;
        let mut state = self.lock();
        if !state.running.contains(name) {
            return Err(failure(Operation::Copy, "no running container"));
        }
        let _ = state.seeds.insert(name.to_string(), script);
        Ok(())
    }

    async fn stop(&self, filter: &NameFilter, _timeout: Duration) -> Result<usize, CommandFailure> {
        self.enter(Operation::Stop, EngineCall::Stop(filter.clone())).await?;
        let mut state = self.lock();
        let matched: Vec<String> = state
            .running
            .iter()
            .filter(|name| filter.matches(name))
            .cloned()
            .collect();
        for name in &matched {
            if !state.sticky.contains(name) {
                let _ = state.running.remove(name);
                let _ = state.seeds.remove(name);
            }
        }
        Ok(matched.len())
    }

    async fn logs(&self, name: &str, _timeout: Duration) -> Result<String, CommandFailure> {
        self.enter(Operation::Logs, EngineCall::Logs(name.to_string())).await?;
        Ok(self.lock().logs.clone())
    }

    async fn list_running(
        &self,
        filter: &NameFilter,
        _timeout: Duration,
    ) -> Result<Vec<String>, CommandFailure> {
        self.enter(Operation::List, EngineCall::List(filter.clone())).await?;
        Ok(self
            .lock()
            .running
            .iter()
            .filter(|name| filter.matches(name))
            .cloned()
            .collect())
    }
}
