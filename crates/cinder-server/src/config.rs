//! Server configuration.

use std::net::{AddrParseError, IpAddr, SocketAddr};

use cinder_store::DEFAULT_PARTITIONS;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default worker threads per pipeline stage pool.
pub const DEFAULT_WORKERS: usize = 8;

/// Typed configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub host: String,
    /// Listen port. Port 0 asks the OS for a free port.
    pub port: u16,
    /// Number of store partitions.
    pub partitions: usize,
    /// Worker threads in each of the read, execute, and write pools.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            partitions: DEFAULT_PARTITIONS,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ServerConfig {
    /// Resolves the host and port into a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.host.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Rejects configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.partitions == 0 {
            return Err("partition count must be at least 1".into());
        }
        if self.workers == 0 {
            return Err("worker count must be at least 1".into());
        }
        if let Err(e) = self.socket_addr() {
            return Err(format!("invalid listen address '{}': {e}", self.host));
        }
        Ok(())
    }
}
