//! System-wide constants and defaults.

/// Namespace prefix carried by every container and temp file testbay creates.
///
/// Startup and signal sweeps target anything whose name starts with it.
pub const NAMESPACE_PREFIX: &str = "testbay-";

/// Container engine binary invoked by the CLI engine.
pub const DEFAULT_ENGINE_BINARY: &str = "docker";

/// Per-step timeout for every engine operation in a lifecycle sequence.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;

/// Interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Extra delay after the ready marker is seen before the workload starts.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 3_000;

/// Upper bound on how long the startup sweep waits for prefixed containers to vanish.
pub const DEFAULT_SWEEP_TIMEOUT_SECS: u64 = 60;

/// Upper bound on fetching container logs to enrich a failure.
pub const LOG_FETCH_TIMEOUT_SECS: u64 = 5;

/// Interval between checks while waiting for the sweep to finish.
pub const SWEEP_POLL_INTERVAL_MS: u64 = 1_000;

/// Size of the bounded buffer each captured output stream is truncated to.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How many OS-offered ports may be rejected as already spent before allocation fails.
pub const MAX_PORT_ATTEMPTS: usize = 10;

/// Lowest port number the allocator will ever hand out.
pub const MIN_ALLOCATED_PORT: u16 = 1024;

/// Separator placed between the file payload and the inline payload.
pub const SEED_SEPARATOR: &str = "; ";

/// Suffix of seed scripts written to the temp directory.
pub const SEED_FILE_SUFFIX: &str = ".sql";

/// Exit status used when a termination signal triggers the mass sweep.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Binary name for the CLI.
pub const BIN_NAME: &str = "tbay";
