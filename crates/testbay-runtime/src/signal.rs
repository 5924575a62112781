//! Termination signal handling.
//!
//! On SIGINT or SIGTERM every prefixed container is stopped and leftover
//! seed files are removed before the process exits. This runs alongside
//! whatever lifecycle sequences are in flight and does not wait for them.
//! SIGKILL cannot be caught; the next process's startup sweep covers it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use testbay_common::constants::SIGNAL_EXIT_CODE;
use testbay_common::types::NameFilter;

use crate::engine::ContainerEngine;
use crate::runner::within;
use crate::seed;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Registers the process-wide signal sweep.
///
/// Only the first call in a process registers anything; later calls return
/// `false`. Registration failure is logged, never fatal.
pub fn install(
    engine: Arc<dyn ContainerEngine>,
    prefix: String,
    temp_dir: PathBuf,
    timeout: Duration,
) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let result = ctrlc::set_handler(move || {
        tracing::warn!(%prefix, "termination signal received, sweeping containers");
        sweep_blocking(engine.as_ref(), &prefix, &temp_dir, timeout);
        std::process::exit(SIGNAL_EXIT_CODE);
    });

    match result {
        Ok(()) => {
            tracing::debug!("signal sweep registered");
            true
        }
        Err(e) => {
            tracing::warn!(%e, "could not register signal handler");
            false
        }
    }
}

/// Sweeps from the signal thread, which has no async runtime of its own.
fn sweep_blocking(
    engine: &dyn ContainerEngine,
    prefix: &str,
    temp_dir: &std::path::Path,
    timeout: Duration,
) {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => {
            let filter = NameFilter::Prefix(prefix.to_string());
            let what = format!("stop {filter}");
            let stop = within(timeout, &what, engine.stop(&filter, timeout));
            if let Err(e) = rt.block_on(stop) {
                tracing::warn!(%e, "signal sweep failed");
            }
        }
        Err(e) => tracing::warn!(%e, "could not build runtime for signal sweep"),
    }
    let _ = seed::remove_stale(temp_dir, prefix);
}
