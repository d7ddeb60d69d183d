//! Server endpoint configuration

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default local SOCKS5 listen address
fn default_socks_listen() -> SocketAddr {
    "127.0.0.1:1080".parse().unwrap()
}

/// Default ping interval in seconds
fn default_ping_interval() -> u64 {
    60
}

/// Default pong timeout in seconds
fn default_pong_timeout() -> u64 {
    20
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// WebSocket control listener address
    pub ws_listen: SocketAddr,

    /// Local SOCKS5 listener address
    #[serde(default = "default_socks_listen")]
    pub socks_listen: SocketAddr,

    /// Seconds between WebSocket pings to the agent
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,

    /// Seconds to wait for a pong before tearing the connection down
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,
}

impl ServerConfig {
    /// Ping interval as a `Duration`
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    /// Pong timeout as a `Duration`
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval == 0 {
            bail!("ping_interval must be positive");
        }
        if self.pong_timeout == 0 {
            bail!("pong_timeout must be positive");
        }
        Ok(())
    }
}
