//! Configuration for pine-net
//!
//! Centralized configuration with sensible defaults. Timeouts are off unless
//! explicitly set: a stalled peer keeps its connection until the socket layer
//! reports an error.

use std::time::Duration;

use crate::protocol::MAX_MESSAGE_SIZE;

/// Configuration shared by servers and clients
#[derive(Debug, Clone)]
pub struct NetConfig {
    // -------------------------------------------------------------------------
    // Listener Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address (servers only)
    pub bind_addr: String,

    // -------------------------------------------------------------------------
    // Reactor Configuration
    // -------------------------------------------------------------------------
    /// Number of background I/O threads driving the reactor
    pub io_threads: usize,

    /// Name given to the background I/O thread(s)
    pub thread_name: String,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Largest body size accepted from a peer; larger headers close the connection
    pub max_message_size: u32,

    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,

    /// Deadline for resolve + connect (clients only)
    pub connect_timeout: Option<Duration>,

    /// Deadline for each header or body read
    pub read_timeout: Option<Duration>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:6000".to_string(),
            io_threads: 1,
            thread_name: "pine-net-io".to_string(),
            max_message_size: MAX_MESSAGE_SIZE,
            nodelay: true,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl NetConfig {
    /// Create a new config builder
    pub fn builder() -> NetConfigBuilder {
        NetConfigBuilder::default()
    }
}

/// Builder for NetConfig
#[derive(Default)]
pub struct NetConfigBuilder {
    config: NetConfig,
}

impl NetConfigBuilder {
    /// Set the TCP listen address
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Listen on all interfaces at the given port
    pub fn port(mut self, port: u16) -> Self {
        self.config.bind_addr = format!("0.0.0.0:{}", port);
        self
    }

    /// Set the number of I/O threads (minimum 1)
    pub fn io_threads(mut self, count: usize) -> Self {
        self.config.io_threads = count.max(1);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the maximum accepted body size (in bytes)
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set a deadline for connecting
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set a deadline for each read step
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> NetConfig {
        self.config
    }
}
