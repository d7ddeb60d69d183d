//! Reverse SOCKS5 module: engine, session packets, and both job workers

mod agent;
mod listener;
pub mod packet;
pub mod session;
pub mod stream;
pub mod wire;

pub use agent::SocksAgent;
pub use listener::SocksListener;
pub use packet::SocksPacket;
pub use session::{serve_session, SessionSettings};
pub use stream::QueueStream;
