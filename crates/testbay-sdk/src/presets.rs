//! Preconfigured database services.
//!
//! Both presets rely on the official images running every script in
//! `/docker-entrypoint-initdb.d` on first start, and detect readiness by
//! querying the marker table the seed script creates last.

use testbay_common::error::Result;
use testbay_runtime::{ContainerHandle, Lifecycle, ServiceDefinition};

/// Root password baked into both presets.
pub const PASSWORD: &str = "pass";

/// MySQL: `mysql:latest` on 3306.
#[must_use]
pub fn mysql() -> ServiceDefinition {
    ServiceDefinition::new("mysql", "mysql:latest", 3306)
        .env("MYSQL_ROOT_PASSWORD", PASSWORD)
        .ready_marker(
            "CREATE TABLE mysql.z_z_(id integer)",
            format!(
                "mysql -uroot -p{PASSWORD} -e 'select \"initialization table found\" from mysql.z_z_ limit 1'"
            ),
        )
}

/// PostgreSQL: `postgres:latest` on 5432.
#[must_use]
pub fn postgres() -> ServiceDefinition {
    ServiceDefinition::new("postgres", "postgres:latest", 5432)
        .env("POSTGRES_PASSWORD", PASSWORD)
        .ready_marker(
            "CREATE TABLE z_z_(id integer)",
            "psql -U postgres -tAc 'select 1 from z_z_ limit 1'",
        )
}

/// Looks a preset up by name.
#[must_use]
pub fn by_name(service: &str) -> Option<ServiceDefinition> {
    match service {
        "mysql" => Some(mysql()),
        "postgres" | "postgresql" | "pg" => Some(postgres()),
        _ => None,
    }
}

/// MySQL handles.
#[derive(Debug, Clone, Copy)]
pub struct Mysql;

impl Mysql {
    /// Handle named `testbay-mysql-{name}` on a freshly allocated port.
    ///
    /// # Errors
    ///
    /// Returns an error if no port could be allocated.
    pub fn new(name: &str) -> Result<(ContainerHandle, u16)> {
        Self::new_in(Lifecycle::global(), name, None)
    }

    /// Handle publishing MySQL on a caller-chosen host port.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to match [`Mysql::new`].
    pub fn with_port(name: &str, port: u16) -> Result<(ContainerHandle, u16)> {
        Self::new_in(Lifecycle::global(), name, Some(port))
    }

    /// Handle bound to a specific lifecycle.
    ///
    /// # Errors
    ///
    /// Returns an error if `port` is `None` and allocation fails.
    pub fn new_in(
        lifecycle: &Lifecycle,
        name: &str,
        port: Option<u16>,
    ) -> Result<(ContainerHandle, u16)> {
        ContainerHandle::new(lifecycle, mysql(), name, port)
    }
}

/// PostgreSQL handles.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl Postgres {
    /// Handle named `testbay-postgres-{name}` on a freshly allocated port.
    ///
    /// # Errors
    ///
    /// Returns an error if no port could be allocated.
    pub fn new(name: &str) -> Result<(ContainerHandle, u16)> {
        Self::new_in(Lifecycle::global(), name, None)
    }

    /// Handle publishing PostgreSQL on a caller-chosen host port.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to match [`Postgres::new`].
    pub fn with_port(name: &str, port: u16) -> Result<(ContainerHandle, u16)> {
        Self::new_in(Lifecycle::global(), name, Some(port))
    }

    /// Handle bound to a specific lifecycle.
    ///
    /// # Errors
    ///
    /// Returns an error if `port` is `None` and allocation fails.
    pub fn new_in(
        lifecycle: &Lifecycle,
        name: &str,
        port: Option<u16>,
    ) -> Result<(ContainerHandle, u16)> {
        ContainerHandle::new(lifecycle, postgres(), name, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_preset_matches_official_image() {
        let def = mysql();
        assert_eq!(def.image, "mysql:latest");
        assert_eq!(def.internal_port, 3306);
        assert_eq!(def.init_dir, "/docker-entrypoint-initdb.d");
        assert_eq!(def.env, vec![("MYSQL_ROOT_PASSWORD".into(), "pass".into())]);
        assert_eq!(def.marker_statement, "CREATE TABLE mysql.z_z_(id integer)");
        assert!(def.ready_probe.contains("from mysql.z_z_ limit 1"));
        assert!(def.ready_probe.starts_with("mysql -uroot -ppass"));
    }

    #[test]
    fn postgres_probe_reads_marker_table() {
        let def = postgres();
        assert_eq!(def.internal_port, 5432);
        assert!(def.ready_probe.contains("z_z_"));
        assert!(def.marker_statement.starts_with("CREATE TABLE z_z_"));
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(by_name("mysql").map(|d| d.kind), Some("mysql".into()));
        assert_eq!(by_name("pg").map(|d| d.kind), Some("postgres".into()));
        assert!(by_name("oracle").is_none());
    }
}
