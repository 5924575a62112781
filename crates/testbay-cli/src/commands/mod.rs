//! CLI command definitions and dispatch.

pub mod logs;
pub mod ps;
pub mod run;
pub mod sweep;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use testbay_common::config::TestbayConfig;
use testbay_common::constants::BIN_NAME;
use testbay_runtime::engine::DockerCli;

/// testbay: disposable, pre-seeded service containers for tests.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; `TESTBAY_*` variables override it.
    #[arg(long, global = true, env = "TESTBAY_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a service, run a command against it, then remove it.
    Run(run::RunArgs),
    /// Stop every container carrying the namespace prefix.
    Sweep(sweep::SweepArgs),
    /// List running containers carrying the namespace prefix.
    Ps(ps::PsArgs),
    /// Print a container's logs.
    Logs(logs::LogsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if configuration loading or the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Run(args) => run::execute(args, config).await,
        Command::Sweep(args) => sweep::execute(args, config).await,
        Command::Ps(args) => ps::execute(args, config).await,
        Command::Logs(args) => logs::execute(args, config).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TestbayConfig> {
    let config = match path {
        Some(path) => TestbayConfig::load(path)?,
        None => TestbayConfig::default(),
    };
    Ok(config.apply_env()?)
}

/// Returns the configured engine, or an error if its binary is not on `PATH`.
fn engine(config: &TestbayConfig) -> anyhow::Result<DockerCli> {
    let engine = DockerCli::new(config.engine_binary.clone(), config.max_output_bytes);
    if !engine.is_available() {
        anyhow::bail!(
            "container engine `{}` not found on PATH\n\
             Install Docker or set TESTBAY_ENGINE to a compatible CLI",
            engine.binary()
        );
    }
    Ok(engine)
}
