//! Collision-free host port allocation.
//!
//! Ports are asked from the OS by binding `127.0.0.1:0`. A port is only
//! bound by its container some time after it is handed out, so the OS may
//! offer it again in the meantime. Every port ever returned is therefore
//! recorded and never returned twice, even after its container is gone.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, PoisonError};

use testbay_common::constants::{MAX_PORT_ATTEMPTS, MIN_ALLOCATED_PORT};
use testbay_common::error::{Result, TestbayError};

/// One port offered by the OS.
///
/// The listener is kept open while the allocation call is still retrying so
/// the OS cannot offer the same port again within that call.
#[derive(Debug)]
pub struct ProbedPort {
    /// Port number offered.
    pub port: u16,
    /// Listener holding the port, if any.
    pub listener: Option<TcpListener>,
}

/// Hands out unique ports for the lifetime of the allocator.
#[derive(Debug)]
pub struct PortAllocator {
    spent: Mutex<HashSet<u16>>,
    max_attempts: usize,
}

impl PortAllocator {
    /// Creates an allocator with the default retry cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_PORT_ATTEMPTS)
    }

    /// Creates an allocator that gives up after `max_attempts` rejected probes.
    #[must_use]
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            spent: Mutex::new(HashSet::new()),
            max_attempts,
        }
    }

    /// Returns a port never handed out before by this allocator.
    ///
    /// # Errors
    ///
    /// Returns [`TestbayError::PortProbe`] if binding the probe socket fails
    /// and [`TestbayError::PortAllocationExhausted`] if every offered port
    /// was already spent.
    pub fn allocate(&self) -> Result<u16> {
        self.allocate_with(probe_loopback)
    }

    /// Allocation loop over an arbitrary probe.
    ///
    /// # Errors
    ///
    /// Same as [`PortAllocator::allocate`].
    pub fn allocate_with<F>(&self, mut probe: F) -> Result<u16>
    where
        F: FnMut() -> std::io::Result<ProbedPort>,
    {
        let mut held = Vec::new();
        for attempt in 1..=self.max_attempts {
            let probed = probe().map_err(|source| TestbayError::PortProbe { source })?;
            if probed.port >= MIN_ALLOCATED_PORT && self.claim(probed.port) {
                tracing::debug!(port = probed.port, attempt, "allocated port");
                return Ok(probed.port);
            }
            tracing::debug!(port = probed.port, attempt, "port already spent, retrying");
            held.push(probed);
        }
        Err(TestbayError::PortAllocationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Records a caller-chosen port so it is never allocated.
    ///
    /// Returns `false` if the port had already been handed out.
    pub fn reserve(&self, port: u16) -> bool {
        self.claim(port)
    }

    /// Returns every port handed out or reserved so far.
    #[must_use]
    pub fn allocated(&self) -> Vec<u16> {
        let spent = self.spent.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ports: Vec<u16> = spent.iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    fn claim(&self, port: u16) -> bool {
        self.spent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds an ephemeral loopback port and reports it.
///
/// # Errors
///
/// Returns the bind error, if any.
pub fn probe_loopback() -> std::io::Result<ProbedPort> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    Ok(ProbedPort {
        port,
        listener: Some(listener),
    })
}
