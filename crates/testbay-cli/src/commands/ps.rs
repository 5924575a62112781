//! `tbay ps`: List running namespaced containers.

use std::process::ExitCode;

use clap::Args;
use testbay_common::config::TestbayConfig;
use testbay_common::types::NameFilter;
use testbay_runtime::engine::ContainerEngine;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print a JSON array instead of one ID per line.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the engine is unavailable or listing fails.
pub async fn execute(args: PsArgs, config: TestbayConfig) -> anyhow::Result<ExitCode> {
    let engine = super::engine(&config)?;
    let filter = NameFilter::Prefix(config.prefix.clone());
    let ids = engine.list_running(&filter, config.step_timeout()).await?;

    if args.json {
        println!("{}", serde_json::to_string(&ids)?);
    } else if ids.is_empty() {
        println!("No `{}*` containers running.", config.prefix);
    } else {
        println!("CONTAINER ID");
        for id in &ids {
            println!("{id}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
