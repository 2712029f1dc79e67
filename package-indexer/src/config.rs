use std::time::Duration;

use anyhow::{Result, ensure};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Tuning for the connection front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Connections serviced at the same time (worker slots).
    pub max_connections: usize,
    /// Accepted connections allowed to wait for a worker slot.
    pub queue_capacity: usize,
    /// Close a connection after this long without a request. `None` keeps
    /// connections open until the peer leaves.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_connections > 0,
            "max connections must be at least 1"
        );
        ensure!(
            u32::try_from(self.max_connections).is_ok(),
            "max connections must fit in a u32"
        );
        ensure!(self.queue_capacity > 0, "queue capacity must be at least 1");
        if let Some(idle_timeout) = self.idle_timeout {
            ensure!(!idle_timeout.is_zero(), "idle timeout must be non-zero");
        }
        Ok(())
    }
}
