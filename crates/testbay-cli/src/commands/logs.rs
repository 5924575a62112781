//! `tbay logs`: Print a container's logs.

use std::process::ExitCode;

use clap::Args;
use testbay_common::config::TestbayConfig;
use testbay_runtime::engine::ContainerEngine;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name or ID.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the engine is unavailable or cannot be run.
pub async fn execute(args: LogsArgs, config: TestbayConfig) -> anyhow::Result<ExitCode> {
    let engine = super::engine(&config)?;
    let logs = engine.logs(&args.container, config.step_timeout()).await?;

    if logs.is_empty() {
        println!("No logs available for container: {}", args.container);
    } else {
        print!("{logs}");
    }
    Ok(ExitCode::SUCCESS)
}
