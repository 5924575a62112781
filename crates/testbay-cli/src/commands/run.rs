//! `tbay run`: Run a command against a disposable service container.

use std::path::PathBuf;
use std::process::{ExitCode, ExitStatus};
use std::time::Instant;

use clap::Args;
use testbay_common::config::TestbayConfig;
use testbay_runtime::{ContainerHandle, Lifecycle};
use testbay_sdk::presets;
use tokio::process::Command;

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Service preset: `mysql` or `postgres`.
    pub service: String,

    /// Logical container name; defaults to one derived from the process id.
    #[arg(long)]
    pub name: Option<String>,

    /// Host port to publish; allocated automatically when omitted.
    #[arg(long)]
    pub port: Option<u16>,

    /// SQL file to seed the service with, relative to the seed root.
    #[arg(long)]
    pub seed_file: Option<PathBuf>,

    /// SQL statements run after the seed file.
    #[arg(long)]
    pub seed_query: Option<String>,

    /// Command to run once the service is ready.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// The command sees `TESTBAY_PORT` and `TESTBAY_CONTAINER` in its
/// environment; its exit status becomes `tbay`'s.
///
/// # Errors
///
/// Returns an error if the preset is unknown, the engine is missing, a
/// lifecycle step fails, or the command cannot be spawned.
pub async fn execute(args: RunArgs, config: TestbayConfig) -> anyhow::Result<ExitCode> {
    let service = presets::by_name(&args.service).ok_or_else(|| {
        anyhow::anyhow!("unknown service `{}` (expected mysql or postgres)", args.service)
    })?;
    let _ = super::engine(&config)?;

    let lifecycle = Lifecycle::install_global(config)?;
    let logical = args
        .name
        .clone()
        .unwrap_or_else(|| format!("cli-{}", std::process::id()));
    let (mut handle, port) = ContainerHandle::new(lifecycle, service, &logical, args.port)?;
    if let Some(file) = args.seed_file {
        handle = handle.with_seed_file(file);
    }
    if let Some(query) = args.seed_query {
        handle = handle.with_seed_query(query);
    }

    let container = handle.name().to_string();
    let started = Instant::now();
    eprintln!("  Starting {container} on port {port}...");

    let status = handle
        .run_scoped(|| async {
            eprintln!(
                "  {container} ready in {}",
                output::format_elapsed(started.elapsed())
            );
            run_workload(&args.command, port, &container).await
        })
        .await?;

    eprintln!(
        "  {container} removed; command {}",
        output::describe_status(status)
    );
    Ok(ExitCode::from(exit_byte(status)))
}

async fn run_workload(
    command: &[String],
    port: u16,
    container: &str,
) -> std::io::Result<ExitStatus> {
    let Some((program, rest)) = command.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ));
    };
    tracing::info!(%program, port, %container, "running workload command");
    Command::new(program)
        .args(rest)
        .env("TESTBAY_PORT", port.to_string())
        .env("TESTBAY_CONTAINER", container)
        .kill_on_drop(true)
        .status()
        .await
}

/// Maps a child's exit status onto this process's exit code.
///
/// Codes outside `0..=255` and signal deaths become `1`.
fn exit_byte(status: ExitStatus) -> u8 {
    status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}
