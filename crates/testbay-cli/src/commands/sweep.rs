//! `tbay sweep`: Stop every namespaced container and remove stale seed files.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use testbay_common::config::TestbayConfig;
use testbay_runtime::{Lifecycle, seed};

use crate::output;

/// Arguments for the `sweep` command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Return right after issuing the stop, without waiting for removal.
    #[arg(long)]
    pub no_wait: bool,
}

/// Executes the `sweep` command.
///
/// # Errors
///
/// Returns an error if the container engine is unavailable.
pub async fn execute(args: SweepArgs, config: TestbayConfig) -> anyhow::Result<ExitCode> {
    let engine = super::engine(&config)?;
    let lifecycle = Lifecycle::new(Arc::new(engine), config);
    let config = lifecycle.config();
    let started = Instant::now();

    let stopped = lifecycle.sweep().await;
    let clean = args.no_wait || lifecycle.wait_for_sweep().await;
    let removed = seed::remove_stale(&config.temp_dir, &config.prefix);

    println!(
        "Stopped {stopped} container(s) and removed {removed} seed file(s) in {}",
        output::format_elapsed(started.elapsed())
    );
    if clean {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Some `{}*` containers are still running.", config.prefix);
        Ok(ExitCode::FAILURE)
    }
}
