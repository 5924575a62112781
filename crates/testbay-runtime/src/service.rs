//! Parameterization of a containerized service.
//!
//! The lifecycle protocol is the same for every service; a
//! [`ServiceDefinition`] supplies what differs: image, port, environment,
//! where seed scripts go, the marker statement and how to observe it.

/// Everything the lifecycle needs to know about one kind of service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Short service label used in container names, e.g. `mysql`.
    pub kind: String,
    /// Image reference.
    pub image: String,
    /// Port the service listens on inside the container.
    pub internal_port: u16,
    /// Environment passed to the container (credentials and the like).
    pub env: Vec<(String, String)>,
    /// Directory inside the container whose scripts run at first start.
    pub init_dir: String,
    /// Statement appended to every seed script; creates the ready marker.
    pub marker_statement: String,
    /// Shell command run inside the container; exits zero once the marker exists.
    pub ready_probe: String,
}

impl ServiceDefinition {
    /// Creates a definition with the given label, image and internal port.
    #[must_use]
    pub fn new(kind: impl Into<String>, image: impl Into<String>, internal_port: u16) -> Self {
        Self {
            kind: kind.into(),
            image: image.into(),
            internal_port,
            env: Vec::new(),
            init_dir: "/docker-entrypoint-initdb.d".to_string(),
            marker_statement: String::new(),
            ready_probe: String::new(),
        }
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the initialization directory.
    #[must_use]
    pub fn init_dir(mut self, dir: impl Into<String>) -> Self {
        self.init_dir = dir.into();
        self
    }

    /// Sets the marker statement and the probe that detects it.
    #[must_use]
    pub fn ready_marker(mut self, statement: impl Into<String>, probe: impl Into<String>) -> Self {
        self.marker_statement = statement.into();
        self.ready_probe = probe.into();
        self
    }

    /// Overrides the image reference, e.g. to pin a version.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }
}
