//! Process-wide lifecycle state and the startup sweep.
//!
//! A [`Lifecycle`] bundles the engine, configuration and port allocator
//! that every container handle in a process shares. Tests build isolated
//! instances with [`Lifecycle::new`]; library users normally go through
//! [`Lifecycle::global`].

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use testbay_common::config::TestbayConfig;
use testbay_common::constants::SWEEP_POLL_INTERVAL_MS;
use testbay_common::error::{Result, TestbayError};
use testbay_common::types::NameFilter;
use tokio::sync::OnceCell;

use crate::engine::{ContainerEngine, DockerCli};
use crate::ports::PortAllocator;
use crate::runner::within;
use crate::{seed, signal};

static GLOBAL: OnceLock<Lifecycle> = OnceLock::new();

/// Shared state for every container handle in a process.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn ContainerEngine>,
    config: TestbayConfig,
    ports: PortAllocator,
    initialized: OnceCell<()>,
}

impl Lifecycle {
    /// Creates an isolated lifecycle over `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>, config: TestbayConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                ports: PortAllocator::new(),
                initialized: OnceCell::new(),
            }),
        }
    }

    /// Creates a lifecycle driving the container CLI named in `config`.
    #[must_use]
    pub fn docker(config: TestbayConfig) -> Self {
        let engine = DockerCli::new(config.engine_binary.clone(), config.max_output_bytes);
        Self::new(Arc::new(engine), config)
    }

    /// Returns the process-wide lifecycle.
    ///
    /// Built on first use from the default configuration plus `TESTBAY_*`
    /// environment overrides; lives until the process exits.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            let config = TestbayConfig::default().apply_env().unwrap_or_else(|e| {
                tracing::warn!(%e, "ignoring invalid environment configuration");
                TestbayConfig::default()
            });
            Self::docker(config)
        })
    }

    /// Like [`Lifecycle::global`] but with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the global
    /// lifecycle has already been created.
    pub fn install_global(config: TestbayConfig) -> Result<&'static Self> {
        config.validate()?;
        let lifecycle = Self::docker(config);
        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            lifecycle
        });
        if installed {
            Ok(global)
        } else {
            Err(TestbayError::Config {
                message: "global lifecycle already initialised".into(),
            })
        }
    }

    /// The container engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.inner.engine
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &TestbayConfig {
        &self.inner.config
    }

    /// The shared port allocator.
    #[must_use]
    pub fn ports(&self) -> &PortAllocator {
        &self.inner.ports
    }

    /// Returns whether [`Lifecycle::initialize`] has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.initialized()
    }

    /// Runs the startup sequence once; later calls return immediately.
    ///
    /// Stops containers left over from crashed runs, waits (bounded) for
    /// them to disappear, removes stale seed files and registers the
    /// signal sweep. Every part is best-effort.
    pub async fn initialize(&self) {
        self.inner
            .initialized
            .get_or_init(|| async {
                let config = self.config();
                tracing::info!(prefix = %config.prefix, "initialising testbay lifecycle");
                let _ = self.sweep().await;
                let _ = self.wait_for_sweep().await;
                let _ = seed::remove_stale(&config.temp_dir, &config.prefix);
                if config.handle_signals {
                    let _ = signal::install(
                        Arc::clone(self.engine()),
                        config.prefix.clone(),
                        config.temp_dir.clone(),
                        config.step_timeout(),
                    );
                }
            })
            .await;
    }

    /// Stops every running container carrying the namespace prefix.
    ///
    /// Returns how many were stopped; failures are logged and count as zero.
    pub async fn sweep(&self) -> usize {
        let filter = self.prefix_filter();
        let timeout = self.config().step_timeout();
        let stop = self.engine().stop(&filter, timeout);
        match within(timeout, &format!("stop {filter}"), stop).await {
            Ok(0) => 0,
            Ok(count) => {
                tracing::info!(count, %filter, "swept leftover containers");
                count
            }
            Err(e) => {
                tracing::warn!(%e, %filter, "sweep failed");
                0
            }
        }
    }

    /// Polls until no prefixed container is running or the sweep timeout elapses.
    ///
    /// Returns `true` if the namespace was observed empty. Never fails: on
    /// timeout or listing errors the caller proceeds anyway.
    pub async fn wait_for_sweep(&self) -> bool {
        let filter = self.prefix_filter();
        let engine = self.engine();
        let step_timeout = self.config().step_timeout();

        let poll = async {
            loop {
                match engine.list_running(&filter, step_timeout).await {
                    Ok(ids) if ids.is_empty() => return true,
                    Ok(ids) => tracing::debug!(remaining = ids.len(), "waiting for cleanup to finish"),
                    Err(e) => {
                        tracing::warn!(%e, "could not list containers while waiting for sweep");
                        return false;
                    }
                }
                tokio::time::sleep(Duration::from_millis(SWEEP_POLL_INTERVAL_MS)).await;
            }
        };

        let sweep_timeout = self.config().sweep_timeout();
        tokio::time::timeout(sweep_timeout, poll)
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(
                    timeout_secs = sweep_timeout.as_secs(),
                    "prefixed containers still running, proceeding anyway"
                );
                false
            })
    }

    fn prefix_filter(&self) -> NameFilter {
        NameFilter::Prefix(self.config().prefix.clone())
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("config", &self.inner.config)
            .field("ports", &self.inner.ports)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
