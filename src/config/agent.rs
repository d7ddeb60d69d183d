//! Agent endpoint configuration
//!
//! The agent runs the SOCKS engine, so the authentication preference, the
//! credential table, and the engine timeouts live here.

use crate::services::socks5::wire::AuthMethod;
use crate::services::socks5::SessionSettings;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Default authentication preference, most preferred first
fn default_auth_preference() -> Vec<String> {
    vec!["plain".to_string(), "noauth".to_string()]
}

/// Default SOCKS handshake timeout in seconds
fn default_handshake_timeout() -> u64 {
    30
}

/// Default upstream connect timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// Default relay idle timeout in seconds
fn default_relay_idle_timeout() -> u64 {
    60
}

/// Agent configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    /// The server's WebSocket URL, e.g. "ws://server.example.com:8080/"
    pub server_url: String,

    /// Optional HTTP CONNECT proxy URL, credentials in the userinfo part
    #[serde(default)]
    pub http_proxy: Option<String>,

    /// SOCKS authentication methods by name ("plain", "noauth")
    #[serde(default = "default_auth_preference")]
    pub auth_preference: Vec<String>,

    /// SOCKS credential table; omit to accept any credentials
    #[serde(default)]
    pub users: Option<HashMap<String, String>>,

    /// Seconds allowed for a full SOCKS handshake
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Seconds allowed for the upstream dial
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds of one-directional silence before a relay closes
    #[serde(default = "default_relay_idle_timeout")]
    pub relay_idle_timeout: u64,
}

impl AgentConfig {
    /// Parse the configured preference list into methods
    pub fn auth_preference(&self) -> Result<Vec<AuthMethod>> {
        self.auth_preference
            .iter()
            .map(|name| match name.as_str() {
                "noauth" => Ok(AuthMethod::NoAuth),
                "plain" => Ok(AuthMethod::Plain),
                other => bail!("unknown auth method: {other}"),
            })
            .collect()
    }

    /// Build the SOCKS engine settings for this agent
    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings {
            auth_preference: self.auth_preference()?,
            users: self.users.clone(),
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            relay_idle_timeout: Duration::from_secs(self.relay_idle_timeout),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url)?;
        if url.scheme() != "ws" {
            bail!("server_url must use the ws:// scheme, got {}", url.scheme());
        }
        if url.host_str().is_none() {
            bail!("server_url has no host");
        }
        if let Some(proxy) = &self.http_proxy {
            let proxy = Url::parse(proxy)?;
            if proxy.scheme() != "http" {
                bail!("http_proxy must use the http:// scheme");
            }
            if proxy.host_str().is_none() {
                bail!("http_proxy has no host");
            }
        }
        if self.auth_preference.is_empty() {
            bail!("auth_preference must not be empty");
        }
        self.auth_preference()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AgentConfig {
        AgentConfig {
            server_url: "ws://server.example.com:8080/".to_string(),
            http_proxy: None,
            auth_preference: default_auth_preference(),
            users: None,
            handshake_timeout: default_handshake_timeout(),
            connect_timeout: default_connect_timeout(),
            relay_idle_timeout: default_relay_idle_timeout(),
        }
    }

    #[test]
    fn test_validate_accepts_ws_url() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wss_url() {
        let config = AgentConfig {
            server_url: "wss://server.example.com/".to_string(),
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_proxy() {
        let config = AgentConfig {
            http_proxy: Some("socks5://proxy:1080".to_string()),
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_preference_parsing() {
        let config = base_config();
        assert_eq!(
            config.auth_preference().unwrap(),
            vec![AuthMethod::Plain, AuthMethod::NoAuth]
        );

        let config = AgentConfig {
            auth_preference: vec!["gssapi".to_string()],
            ..base_config()
        };
        assert!(config.auth_preference().is_err());
    }

    #[test]
    fn test_session_settings() {
        let config = AgentConfig {
            handshake_timeout: 5,
            ..base_config()
        };
        let settings = config.session_settings().unwrap();
        assert_eq!(settings.handshake_timeout, Duration::from_secs(5));
        assert!(settings.users.is_none());
    }
}
