//! # Socksling - Reverse SOCKS5 Tunneling Proxy
//!
//! Socksling tunnels SOCKS5 through a single WebSocket connection that is
//! opened from the inside out. The **server** exposes a standard SOCKS5
//! listener to ordinary clients and a WebSocket control listener; the
//! **agent** connects out to that control endpoint (optionally through an
//! HTTP CONNECT proxy) and makes the real outbound TCP connections from its
//! own network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksling::config::load_config;
//! use socksling::server::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("socksling.toml")?;
//!     run_server(&config).await
//! }
//! ```
//!
//! ## Architecture
//!
//! All traffic rides one WebSocket as typed command/reply envelopes. The
//! server starts a `socks5` job on each registered agent; local SOCKS5
//! clients become multiplexed sessions whose bytes are forwarded to the
//! agent, where the actual SOCKS5 conversation and the upstream dial happen.
//!
//! ```text
//! SOCKS5 Client -> Server (listener) == WebSocket ==> Agent -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod services;
pub mod transport;

// Re-export commonly used items
pub use agent::run_agent;
pub use config::{load_config, Config};
pub use error::{ProtocolError, Socks5Error};
pub use server::run_server;

/// Version of the Socksling library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
