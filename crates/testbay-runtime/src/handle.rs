//! Scope-bound container handles.
//!
//! [`ContainerHandle::run_scoped`] is the only way to start a container:
//!
//! 1. stop any container already using the name,
//! 2. launch it with the allocated host port published,
//! 3. copy the seed script (payload plus ready marker) into it,
//! 4. poll inside the container until the marker exists, then settle,
//! 5. run the caller's workload,
//! 6. stop the container, whatever happened above.
//!
//! Steps 1-4 and the teardown stop each finish within the configured step
//! timeout, however the engine treats the timeout it is handed. A failure
//! in any step skips the workload. Teardown failures are logged and never
//! replace the result being returned.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use testbay_common::constants::LOG_FETCH_TIMEOUT_SECS;
use testbay_common::error::{CommandFailure, Result, TestbayError};
use testbay_common::types::{ContainerIdentity, ContainerName, LifecycleState, NameFilter};

use crate::engine::{ContainerEngine, RunSpec};
use crate::guard::Lifecycle;
use crate::runner::within;
use crate::seed::{InitializationPayload, SeedFile};
use crate::service::ServiceDefinition;

/// One named, ephemeral container.
#[derive(Debug)]
pub struct ContainerHandle {
    lifecycle: Lifecycle,
    service: ServiceDefinition,
    identity: ContainerIdentity,
    payload: InitializationPayload,
    state: Mutex<LifecycleState>,
}

impl ContainerHandle {
    /// Creates a handle for `service` named after `logical_name`.
    ///
    /// With `port: None` a fresh port is allocated; an explicit port is
    /// recorded so the allocator never hands it out. Returns the handle and
    /// the host port the service will be reachable on.
    ///
    /// # Errors
    ///
    /// Returns an error if port allocation fails.
    pub fn new(
        lifecycle: &Lifecycle,
        service: ServiceDefinition,
        logical_name: &str,
        port: Option<u16>,
    ) -> Result<(Self, u16)> {
        let port = match port {
            Some(port) => {
                if !lifecycle.ports().reserve(port) {
                    tracing::warn!(port, "explicit port was already handed out in this process");
                }
                port
            }
            None => lifecycle.ports().allocate()?,
        };
        let name = ContainerName::namespaced(&lifecycle.config().prefix, &service.kind, logical_name);
        tracing::debug!(%name, port, image = %service.image, "container handle created");

        let handle = Self {
            lifecycle: lifecycle.clone(),
            service,
            identity: ContainerIdentity { name, port },
            payload: InitializationPayload::default(),
            state: Mutex::new(LifecycleState::Created),
        };
        Ok((handle, port))
    }

    /// Seeds the service from a script file before the workload runs.
    #[must_use]
    pub fn with_seed_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.payload.file = Some(path.into());
        self
    }

    /// Seeds the service with literal statements, run after any seed file.
    #[must_use]
    pub fn with_seed_query(mut self, query: impl Into<String>) -> Self {
        self.payload.inline = Some(query.into());
        self
    }

    /// Replaces the whole initialization payload.
    #[must_use]
    pub fn with_payload(mut self, payload: InitializationPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Container name and host port.
    #[must_use]
    pub const fn identity(&self) -> &ContainerIdentity {
        &self.identity
    }

    /// Container name.
    #[must_use]
    pub const fn name(&self) -> &ContainerName {
        &self.identity.name
    }

    /// Host port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.identity.port
    }

    /// Service definition this handle runs.
    #[must_use]
    pub const fn service(&self) -> &ServiceDefinition {
        &self.service
    }

    /// Configured initialization payload.
    #[must_use]
    pub const fn payload(&self) -> &InitializationPayload {
        &self.payload
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches the container's log output; empty if unavailable.
    ///
    /// Bounded by the shorter of the step timeout and
    /// [`LOG_FETCH_TIMEOUT_SECS`].
    pub async fn logs(&self) -> String {
        let timeout = self
            .lifecycle
            .config()
            .step_timeout()
            .min(Duration::from_secs(LOG_FETCH_TIMEOUT_SECS));
        let name = self.identity.name.as_str();
        let fetch = self.lifecycle.engine().logs(name, timeout);
        within(timeout, &format!("logs {name}"), fetch)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(name = %self.identity.name, %e, "could not fetch container logs");
                String::new()
            })
    }

    /// Starts the container, runs `workload` once it is ready, and tears
    /// the container down.
    ///
    /// The container is stopped on every exit path: success, a failed
    /// step, a workload error, and a workload panic (which is re-raised
    /// after cleanup). If this future is dropped midway, the stop is
    /// spawned onto the current runtime.
    ///
    /// # Errors
    ///
    /// Returns the first failing lifecycle step, or the workload's own
    /// error wrapped in [`TestbayError::Workload`].
    pub async fn run_scoped<F, Fut, T, E>(&self, workload: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.lifecycle.initialize().await;
        self.transition(LifecycleState::Created);

        let teardown = Teardown::arm(
            Arc::clone(self.lifecycle.engine()),
            self.identity.name.exact_filter(),
            self.lifecycle.config().step_timeout(),
        );
        let outcome = AssertUnwindSafe(self.drive(workload)).catch_unwind().await;

        let failed = match &outcome {
            Ok(Ok(_) | Err(TestbayError::Workload(_))) => false,
            Ok(Err(e)) => {
                tracing::error!(name = %self.identity.name, %e, "container lifecycle failed");
                true
            }
            Err(_) => {
                tracing::error!(name = %self.identity.name, "workload panicked");
                true
            }
        };

        self.transition(LifecycleState::CleaningUp);
        teardown.run().await;
        self.transition(if failed {
            LifecycleState::Failed
        } else {
            LifecycleState::Terminated
        });

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn drive<F, Fut, T, E>(&self, workload: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let engine = self.lifecycle.engine();
        let config = self.lifecycle.config();
        let step = config.step_timeout();
        let name = self.identity.name.as_str();

        // Leaked from an earlier failed attempt with the same identity.
        let filter = self.identity.name.exact_filter();
        if let Err(e) = within(step, &format!("stop {filter}"), engine.stop(&filter, step)).await {
            tracing::warn!(%name, %e, "pre-emptive cleanup failed");
        }

        let seed_script = if self.should_seed() {
            Some(
                self.payload
                    .compose(&config.seed_root, &self.service.marker_statement)?,
            )
        } else {
            None
        };

        self.transition(LifecycleState::Launching);
        let spec = self.run_spec();
        if let Err(source) = within(step, &format!("run {name}"), engine.run(&spec, step)).await {
            return Err(TestbayError::LaunchFailed {
                name: name.to_string(),
                source,
                logs: self.logs().await,
            });
        }

        if let Some(script) = seed_script {
            self.transition(LifecycleState::SeedingData);
            let seed = SeedFile::write(&script, &config.temp_dir, &config.prefix)?;
            let init_dir = self.service.init_dir.as_str();
            let copy = engine.copy_into(seed.path(), name, init_dir, step);
            if let Err(source) = within(step, &format!("copy seed into {name}"), copy).await {
                return Err(TestbayError::SeedCopyFailed {
                    name: name.to_string(),
                    source,
                    logs: self.logs().await,
                });
            }
            drop(seed);
        }

        self.transition(LifecycleState::AwaitingReady);
        self.await_ready().await?;
        self.transition(LifecycleState::Ready);
        tracing::info!(%name, port = self.identity.port, "container ready");

        self.transition(LifecycleState::Running);
        workload()
            .await
            .map_err(|e| TestbayError::Workload(e.into()))
    }

    /// Polls the ready probe inside the container, then waits the settle delay.
    async fn await_ready(&self) -> Result<()> {
        let engine = self.lifecycle.engine();
        let config = self.lifecycle.config();
        let step = config.step_timeout();
        let name = self.identity.name.as_str();
        let probe = self.service.ready_probe.as_str();

        let wait = async {
            if !probe.is_empty() {
                poll_until_ready(engine.as_ref(), name, probe, step, config.poll_interval()).await?;
                tracing::debug!(%name, "ready marker observed, settling");
            }
            tokio::time::sleep(config.settle_delay()).await;
            Ok::<(), CommandFailure>(())
        };

        match tokio::time::timeout(step, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TestbayError::ReadinessProbe {
                name: name.to_string(),
                source,
                logs: self.logs().await,
            }),
            Err(_) => Err(TestbayError::ReadinessTimeout {
                name: name.to_string(),
                timeout: step,
                logs: self.logs().await,
            }),
        }
    }

    fn should_seed(&self) -> bool {
        !self.payload.is_empty() || !self.service.marker_statement.is_empty()
    }

    fn run_spec(&self) -> RunSpec {
        RunSpec {
            name: self.identity.name.as_str().to_string(),
            image: self.service.image.clone(),
            host_port: self.identity.port,
            internal_port: self.service.internal_port,
            env: self.service.env.clone(),
            detached: true,
        }
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = std::mem::replace(&mut *state, next);
        drop(state);
        tracing::debug!(name = %self.identity.name, from = %prev, to = %next, "lifecycle transition");
    }
}

/// Re-runs the probe until it exits zero.
///
/// A probe that exits non-zero or times out means "not yet"; one that
/// cannot be spawned at all ends the wait.
async fn poll_until_ready(
    engine: &dyn ContainerEngine,
    name: &str,
    probe: &str,
    timeout: Duration,
    interval: Duration,
) -> std::result::Result<(), CommandFailure> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match engine.exec(name, probe, timeout).await {
            Ok(_) => return Ok(()),
            Err(e @ CommandFailure::Spawn { .. }) => return Err(e),
            Err(e) => tracing::debug!(%name, attempt, %e, "waiting for ready marker"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Stops a container when dropped unless [`Teardown::run`] already did.
struct Teardown {
    engine: Arc<dyn ContainerEngine>,
    filter: NameFilter,
    timeout: Duration,
    armed: bool,
}

impl Teardown {
    const fn arm(engine: Arc<dyn ContainerEngine>, filter: NameFilter, timeout: Duration) -> Self {
        Self {
            engine,
            filter,
            timeout,
            armed: true,
        }
    }

    async fn run(mut self) {
        self.armed = false;
        stop_quietly(self.engine.as_ref(), &self.filter, self.timeout).await;
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let engine = Arc::clone(&self.engine);
        let filter = self.filter.clone();
        let timeout = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(%filter, "scope dropped early, spawning cleanup");
                drop(runtime.spawn(async move {
                    stop_quietly(engine.as_ref(), &filter, timeout).await;
                }));
            }
            Err(_) => tracing::warn!(%filter, "no runtime available to clean up container"),
        }
    }
}

async fn stop_quietly(engine: &dyn ContainerEngine, filter: &NameFilter, timeout: Duration) {
    match within(timeout, &format!("stop {filter}"), engine.stop(filter, timeout)).await {
        Ok(count) => tracing::debug!(%filter, count, "container cleaned up"),
        Err(source) => {
            let err = TestbayError::CleanupFailed {
                name: filter.to_string(),
                source,
            };
            tracing::warn!(%err, "cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tempfile::TempDir;
    use testbay_common::config::TestbayConfig;

    use super::*;
    use crate::testing::{EngineCall, FakeEngine, Operation};

    fn config(dir: &Path) -> TestbayConfig {
        TestbayConfig {
            handle_signals: false,
            temp_dir: dir.to_path_buf(),
            seed_root: dir.to_path_buf(),
            ..TestbayConfig::default()
        }
    }

    fn service() -> ServiceDefinition {
        ServiceDefinition::new("mysql", "mysql:latest", 3306)
            .env("MYSQL_ROOT_PASSWORD", "pass")
            .ready_marker("CREATE TABLE marker", "probe-marker")
    }

    fn setup_with(engine: FakeEngine, tweak: impl FnOnce(&mut TestbayConfig)) -> (Arc<FakeEngine>, Lifecycle, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        tweak(&mut config);
        let engine = Arc::new(engine);
        let lifecycle = Lifecycle::new(engine.clone(), config);
        (engine, lifecycle, dir)
    }

    fn setup(engine: FakeEngine) -> (Arc<FakeEngine>, Lifecycle, TempDir) {
        setup_with(engine, |_| {})
    }

    fn teardown_stops(engine: &FakeEngine, name: &str) -> usize {
        engine
            .calls_after_launch(name)
            .iter()
            .filter(|c| matches!(c, EngineCall::Stop(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn successful_run_returns_workload_value() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, port) = ContainerHandle::new(&lifecycle, service(), "ok", None).unwrap();
        assert_eq!(handle.port(), port);
        assert_eq!(handle.name().as_str(), "testbay-mysql-ok");

        let value = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(42) })
            .await
            .expect("run");
        assert_eq!(value, 42);
        assert_eq!(handle.state(), LifecycleState::Terminated);
        assert!(!engine.is_running("testbay-mysql-ok"));
        assert!(lifecycle.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn workload_sees_running_state_and_published_port() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, port) = ContainerHandle::new(&lifecycle, service(), "state", None).unwrap();

        handle
            .run_scoped(|| async {
                assert_eq!(handle.state(), LifecycleState::Running);
                Ok::<_, std::io::Error>(())
            })
            .await
            .unwrap();

        assert!(engine.calls().contains(&EngineCall::Run {
            name: "testbay-mysql-state".into(),
            host_port: port,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn workload_runs_only_after_marker_observed() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new().with_probe_failures(3));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "order", None).unwrap();

        let saw_ready = AtomicBool::new(false);
        handle
            .run_scoped(|| async {
                let ready = engine
                    .calls()
                    .iter()
                    .any(|c| matches!(c, EngineCall::Exec { ready: true, .. }));
                saw_ready.store(ready, Ordering::SeqCst);
                Ok::<_, std::io::Error>(())
            })
            .await
            .unwrap();

        assert!(saw_ready.load(Ordering::SeqCst));
        let probes = engine
            .calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Exec { .. }))
            .count();
        assert_eq!(probes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn steps_run_in_order() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, port) = ContainerHandle::new(&lifecycle, service(), "seq", None).unwrap();
        handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap();

        let name = "testbay-mysql-seq".to_string();
        let exact = NameFilter::Exact(name.clone());
        let calls: Vec<EngineCall> = engine
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, EngineCall::List(_) | EngineCall::Stop(NameFilter::Prefix(_))))
            .collect();
        assert_eq!(
            calls,
            vec![
                EngineCall::Stop(exact.clone()),
                EngineCall::Run {
                    name: name.clone(),
                    host_port: port,
                },
                EngineCall::Copy {
                    name: name.clone(),
                    remote_dir: "/docker-entrypoint-initdb.d".into(),
                },
                EngineCall::Exec { name, ready: true },
                EngineCall::Stop(exact),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn seed_temp_file_is_removed_after_run() {
        let (engine, lifecycle, dir) = setup(FakeEngine::new());
        std::fs::write(dir.path().join("schema.sql"), "CREATE TABLE t();").unwrap();
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "seed", None).unwrap();
        let handle = handle.with_seed_file("schema.sql");

        handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap();

        assert!(engine.seed_script("testbay-mysql-seed").is_none());
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("testbay-"))
            .count();
        assert_eq!(leftovers, 0, "seed temp file must be removed");
    }

    #[tokio::test(start_paused = true)]
    async fn seed_script_is_copied_before_workload() {
        let (engine, lifecycle, dir) = setup(FakeEngine::new());
        std::fs::write(dir.path().join("schema.sql"), "CREATE TABLE t();").unwrap();
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "script", None).unwrap();
        let handle = handle
            .with_seed_file("schema.sql")
            .with_seed_query("INSERT INTO t VALUES (1);");

        let script = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(engine.seed_script("testbay-mysql-script")) })
            .await
            .unwrap();
        assert_eq!(
            script.as_deref(),
            Some("CREATE TABLE t();; INSERT INTO t VALUES (1);;CREATE TABLE marker;")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn marker_is_seeded_without_payload() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "bare", None).unwrap();

        let script = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(engine.seed_script("testbay-mysql-bare")) })
            .await
            .unwrap();
        assert_eq!(script.as_deref(), Some("CREATE TABLE marker;"));
    }

    #[tokio::test(start_paused = true)]
    async fn service_without_marker_skips_seed_and_probe() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let plain = ServiceDefinition::new("cache", "redis:latest", 6379);
        let (handle, _) = ContainerHandle::new(&lifecycle, plain, "plain", None).unwrap();

        handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap();
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::Copy { .. } | EngineCall::Exec { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn workload_error_passes_through_and_container_stops_once() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "werr", None).unwrap();

        let err = handle
            .run_scoped(|| async { Err::<(), _>(std::io::Error::other("assertion failed")) })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "assertion failed");
        assert!(err.as_workload().is_some());
        assert_eq!(handle.state(), LifecycleState::Terminated);

        assert_eq!(teardown_stops(&engine, "testbay-mysql-werr"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn workload_panic_still_cleans_up_and_resumes() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "panic", None).unwrap();

        let result = AssertUnwindSafe(handle.run_scoped(|| async {
            if handle.port() > 0 {
                panic!("workload crashed");
            }
            Ok::<_, std::io::Error>(())
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(handle.state(), LifecycleState::Failed);
        assert!(!engine.is_running("testbay-mysql-panic"));
        assert_eq!(teardown_stops(&engine, "testbay-mysql-panic"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_skips_workload_and_embeds_logs() {
        let (engine, lifecycle, _dir) = setup(
            FakeEngine::new()
                .failing(Operation::Run)
                .with_logs("[ERROR] unknown variable 'foo'"),
        );
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "launch", None).unwrap();

        let ran = AtomicBool::new(false);
        let err = handle
            .run_scoped(|| async {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, std::io::Error>(())
            })
            .await
            .unwrap_err();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(matches!(err, TestbayError::LaunchFailed { .. }));
        assert!(err.to_string().contains("unknown variable 'foo'"));
        assert_eq!(handle.state(), LifecycleState::Failed);
        assert_eq!(teardown_stops(&engine, "testbay-mysql-launch"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seed_copy_failure_aborts_before_readiness() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new().failing(Operation::Copy));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "copy", None).unwrap();

        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, TestbayError::SeedCopyFailed { .. }));
        assert!(!engine.calls().iter().any(|c| matches!(c, EngineCall::Exec { .. })));
        assert!(!engine.is_running("testbay-mysql-copy"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_seed_file_fails_before_launch() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "nofile", None).unwrap();
        let handle = handle.with_seed_file("/nonexistent/schema.sql");

        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, TestbayError::SeedWriteFailed { .. }));
        assert!(!engine.calls().iter().any(|c| matches!(c, EngineCall::Run { .. })));
        assert_eq!(handle.state(), LifecycleState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_within_step_timeout() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new().with_probe_failures(usize::MAX));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "slow", None).unwrap();

        let started = tokio::time::Instant::now();
        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TestbayError::ReadinessTimeout { .. }));
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(62));
        assert!(!engine.is_running("testbay-mysql-slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_is_bounded_by_step_timeout() {
        let (_engine, lifecycle, _dir) = setup(FakeEngine::new().hanging(Operation::Exec));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "hang", None).unwrap();

        let started = tokio::time::Instant::now();
        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, TestbayError::ReadinessTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_launch_fails_within_step_timeout() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new().hanging(Operation::Run));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "hungrun", None).unwrap();

        let started = tokio::time::Instant::now();
        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        let TestbayError::LaunchFailed { source, .. } = &err else {
            panic!("expected launch failure, got {err}");
        };
        assert!(source.is_timeout());
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
        assert_eq!(teardown_stops(&engine, "testbay-mysql-hungrun"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_seed_copy_fails_within_step_timeout() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new().hanging(Operation::Copy));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "hungcp", None).unwrap();

        let started = tokio::time::Instant::now();
        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        let TestbayError::SeedCopyFailed { source, .. } = &err else {
            panic!("expected seed copy failure, got {err}");
        };
        assert!(source.is_timeout());
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
        assert!(!engine.is_running("testbay-mysql-hungcp"));
        assert_eq!(handle.state(), LifecycleState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_log_fetch_does_not_delay_failure() {
        let (_engine, lifecycle, _dir) = setup(
            FakeEngine::new()
                .failing(Operation::Run)
                .hanging(Operation::Logs),
        );
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "hunglogs", None).unwrap();

        let started = tokio::time::Instant::now();
        let err = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        let TestbayError::LaunchFailed { logs, .. } = &err else {
            panic!("expected launch failure, got {err}");
        };
        assert!(logs.is_empty());
        assert!(elapsed >= Duration::from_secs(LOG_FETCH_TIMEOUT_SECS));
        assert!(elapsed < Duration::from_secs(LOG_FETCH_TIMEOUT_SECS + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_stop_bounds_every_stop_in_the_sequence() {
        let (_engine, lifecycle, _dir) = setup(FakeEngine::new().hanging(Operation::Stop));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "hungstop", None).unwrap();

        let started = tokio::time::Instant::now();
        let value = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(7) })
            .await
            .expect("a stuck stop is only logged");
        let elapsed = started.elapsed();

        assert_eq!(value, 7);
        assert_eq!(handle.state(), LifecycleState::Terminated);
        // Startup sweep, pre-emptive stop and teardown each give up after
        // one step timeout; the settle delay comes on top.
        assert!(elapsed >= Duration::from_secs(183));
        assert!(elapsed < Duration::from_secs(186));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_failure_does_not_mask_workload_result() {
        let (_engine, lifecycle, _dir) = setup(FakeEngine::new().failing(Operation::Stop));
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "stopfail", None).unwrap();

        let value = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>("done") })
            .await
            .expect("cleanup failure must not surface");
        assert_eq!(value, "done");
        assert_eq!(handle.state(), LifecycleState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_is_applied_after_marker() {
        let (_engine, lifecycle, _dir) =
            setup_with(FakeEngine::new(), |c| c.settle_delay_ms = 7_000);
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "settle", None).unwrap();

        let started = tokio::time::Instant::now();
        let waited = handle
            .run_scoped(|| async { Ok::<_, std::io::Error>(started.elapsed()) })
            .await
            .unwrap();
        assert!(waited >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_scope_spawns_cleanup() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, _) = ContainerHandle::new(&lifecycle, service(), "drop", None).unwrap();

        let scoped = handle.run_scoped(|| async {
            std::future::pending::<()>().await;
            Ok::<_, std::io::Error>(())
        });
        let timed = tokio::time::timeout(Duration::from_secs(30), scoped).await;
        assert!(timed.is_err());
        assert!(engine.is_running("testbay-mysql-drop"));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!engine.is_running("testbay-mysql-drop"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_port_is_reserved() {
        let (_engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (handle, port) =
            ContainerHandle::new(&lifecycle, service(), "fixed", Some(45_000)).unwrap();
        assert_eq!(port, 45_000);
        assert_eq!(handle.identity().port, 45_000);
        assert!(lifecycle.ports().allocated().contains(&45_000));
    }

    #[tokio::test(start_paused = true)]
    async fn two_handles_run_independently() {
        let (engine, lifecycle, _dir) = setup(FakeEngine::new());
        let (first, p1) = ContainerHandle::new(&lifecycle, service(), "one", None).unwrap();
        let (second, p2) = ContainerHandle::new(&lifecycle, service(), "two", None).unwrap();
        assert_ne!(p1, p2);
        assert!(p1 >= 1024 && p2 >= 1024);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run_first = async {
            let r = first
                .run_scoped(|| async { Ok::<_, std::io::Error>(()) })
                .await;
            let _ = tx.send(());
            r
        };
        let run_second = second.run_scoped(|| async {
            let _ = rx.await;
            assert_eq!(first.state(), LifecycleState::Terminated);
            assert_eq!(second.state(), LifecycleState::Running);
            assert!(engine.is_running("testbay-mysql-two"));
            assert!(!engine.is_running("testbay-mysql-one"));
            Ok::<_, std::io::Error>(())
        });

        let (a, b) = tokio::join!(run_first, run_second);
        a.unwrap();
        b.unwrap();
        assert_eq!(second.state(), LifecycleState::Terminated);
    }
}
