//! Fluent API for describing custom services.

use testbay_common::error::{Result, TestbayError};
use testbay_runtime::{ContainerHandle, Lifecycle, ServiceDefinition};

/// Builder for a [`ServiceDefinition`] not covered by the presets.
#[derive(Debug)]
pub struct ContainerBuilder {
    kind: String,
    image: Option<String>,
    internal_port: Option<u16>,
    env: Vec<(String, String)>,
    init_dir: Option<String>,
    marker: Option<(String, String)>,
}

impl ContainerBuilder {
    /// Creates a builder for services labelled `kind` in container names.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            image: None,
            internal_port: None,
            env: Vec::new(),
            init_dir: None,
            marker: None,
        }
    }

    /// Sets the image reference.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sets the port the service listens on inside the container.
    #[must_use]
    pub const fn internal_port(mut self, port: u16) -> Self {
        self.internal_port = Some(port);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Overrides the directory seed scripts are copied into.
    #[must_use]
    pub fn init_dir(mut self, dir: impl Into<String>) -> Self {
        self.init_dir = Some(dir.into());
        self
    }

    /// Sets the marker statement and the in-container probe that finds it.
    ///
    /// Without a marker the container is considered ready after the
    /// settle delay.
    #[must_use]
    pub fn ready_marker(mut self, statement: impl Into<String>, probe: impl Into<String>) -> Self {
        self.marker = Some((statement.into(), probe.into()));
        self
    }

    /// Builds the service definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the image or internal port is missing, or the
    /// kind is empty.
    pub fn build(self) -> Result<ServiceDefinition> {
        if self.kind.is_empty() {
            return Err(config_error("service kind must not be empty"));
        }
        let image = self.image.ok_or_else(|| config_error("image is required"))?;
        let port = self
            .internal_port
            .ok_or_else(|| config_error("internal port is required"))?;

        let mut def = ServiceDefinition::new(self.kind, image, port);
        def.env = self.env;
        if let Some(dir) = self.init_dir {
            def = def.init_dir(dir);
        }
        if let Some((statement, probe)) = self.marker {
            def = def.ready_marker(statement, probe);
        }
        Ok(def)
    }

    /// Builds the definition and creates a handle for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is incomplete or port allocation fails.
    pub fn handle(
        self,
        lifecycle: &Lifecycle,
        name: &str,
        port: Option<u16>,
    ) -> Result<(ContainerHandle, u16)> {
        ContainerHandle::new(lifecycle, self.build()?, name, port)
    }
}

fn config_error(message: &str) -> TestbayError {
    TestbayError::Config {
        message: message.to_string(),
    }
}
