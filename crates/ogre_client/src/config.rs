//! Client configuration.

use ogre_protocol::DEFAULT_MAX_PAYLOAD_LEN;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for [`TcpTransport`](crate::TcpTransport).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout for one-shot fetches. Subscriptions block indefinitely.
    pub read_timeout: Duration,
    /// Largest payload accepted from the server.
    pub max_payload_len: usize,
}

impl ClientConfig {
    /// Creates a configuration for the given server.
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the fetch read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the maximum payload length.
    pub fn with_max_payload_len(mut self, max: usize) -> Self {
        self.max_payload_len = max;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 7070)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr.port(), 7070);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_payload_len, DEFAULT_MAX_PAYLOAD_LEN);
    }

    #[test]
    fn config_builder() {
        let config = ClientConfig::new("10.0.0.1:9000".parse().unwrap())
            .with_connect_timeout(Duration::from_millis(250))
            .with_read_timeout(Duration::from_secs(2))
            .with_max_payload_len(4096);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.max_payload_len, 4096);
    }
}
