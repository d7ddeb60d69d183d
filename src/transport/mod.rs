//! Transport helpers: socket options, WebSocket setup, proxy bootstrap

mod http_connect;
mod websocket;

pub use http_connect::connect_via_proxy;
pub use websocket::{accept_control, connect_control, ControlStream};

use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Keepalive idle time before probes start
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);
/// Interval between keepalive probes
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Apply our standard TCP options to a socket; failures are non-fatal
pub fn apply_socket_opts(stream: &TcpStream) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "failed to set TCP_NODELAY");
    }
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        debug!(%err, "failed to set TCP keepalive");
    }
}
