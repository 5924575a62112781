//! Ephemeral container lifecycle for test runs.
//!
//! A [`Lifecycle`](guard::Lifecycle) owns the process-wide state (engine,
//! configuration, spent ports) and runs the startup sweep once. A
//! [`ContainerHandle`](handle::ContainerHandle) drives one container
//! through launch, seed, readiness and teardown around a caller workload.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod guard;
pub mod handle;
pub mod ports;
pub mod runner;
pub mod seed;
pub mod service;
pub mod signal;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use guard::Lifecycle;
pub use handle::ContainerHandle;
pub use service::ServiceDefinition;
