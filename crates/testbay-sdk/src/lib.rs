//! # testbay-sdk
//!
//! Public SDK for using testbay as a Rust library.
//!
//! Provides two entry points:
//! - [`presets`]: MySQL and PostgreSQL services wired for the global
//!   lifecycle ([`Mysql`](presets::Mysql), [`Postgres`](presets::Postgres)).
//! - [`ContainerBuilder`](builder::ContainerBuilder): fluent API for any
//!   other service with a readiness probe.
//!
//! # Example
//!
//! ```rust,no_run
//! use testbay_sdk::presets::Mysql;
//!
//! # async fn demo() -> testbay_common::error::Result<()> {
//! let (mysql, port) = Mysql::new("orders")?;
//! let mysql = mysql.with_seed_query("CREATE TABLE orders (id INT);");
//! mysql
//!     .run_scoped(|| async move {
//!         println!("mysql listening on 127.0.0.1:{port}");
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod presets;

pub use testbay_runtime::{ContainerHandle, Lifecycle, ServiceDefinition};
