use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::core::commands::DEFAULT_CONNECT_TIMEOUT;
use crate::core::retry::DEFAULT_RETRY_INTERVAL;

/// Default WebSocket port clients connect to
pub const DEFAULT_PORT: u16 = 8765;

/// Runtime settings of the bridge server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: SocketAddr,

    /// How often an idle connection is pinged
    pub ping_interval: Duration,

    /// How long after a ping the client may stay silent before the
    /// connection is dropped
    pub ping_timeout: Duration,

    /// Wait-for-card timeout for `connect` requests without a `timeout` field
    pub connect_timeout: Duration,

    /// Pause between two attempts while waiting for a card
    pub retry_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl BridgeConfig {
    /// Silence after which a connection is considered dead
    pub fn idle_limit(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}
