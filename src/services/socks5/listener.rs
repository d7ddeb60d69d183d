//! Server-side SOCKS5 job: the local listener
//!
//! Accepts ordinary SOCKS5 clients on a local TCP port and forwards their
//! bytes, unparsed, to the agent as session packets. The SOCKS conversation
//! itself happens on the agent, next to the network it dials from. One driver
//! task owns the session table; per-connection reader tasks only feed it
//! events.

use crate::relay::RELAY_BUF_SIZE;
use crate::services::socks5::packet::SocksPacket;
use crate::services::{JobContext, JobFrame, JobWorker, JOB_QUEUE_CAPACITY};
use crate::transport::apply_socket_opts;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Server-side SOCKS5 worker bound to a local port
pub struct SocksListener {
    listener: TcpListener,
}

/// Events from per-connection reader tasks to the driver
enum SessionEvent {
    Data { session_id: String, bytes: Bytes },
    Closed { session_id: String },
}

impl SocksListener {
    /// Bind the local SOCKS5 listener
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind SOCKS5 listener on {addr}"))?;
        Ok(SocksListener { listener })
    }

    /// The bound address, useful when binding port 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl JobWorker for SocksListener {
    async fn run(self: Box<Self>, mut ctx: JobContext) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "SOCKS5 listener ready");

        let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(JOB_QUEUE_CAPACITY);
        let mut sessions: HashMap<String, OwnedWriteHalf> = HashMap::new();
        let mut tombstones: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = accepted.context("accept failed")?;
                    apply_socket_opts(&socket);
                    let session_id = Uuid::new_v4().to_string();
                    debug!(%peer, session = %session_id, "SOCKS5 client connected");
                    let (read_half, write_half) = socket.into_split();
                    sessions.insert(session_id.clone(), write_half);
                    tokio::spawn(read_session(session_id, read_half, event_tx.clone()));
                }
                event = event_rx.recv() => {
                    // event_tx is held here, the channel cannot close
                    let Some(event) = event else { break };
                    let frame = match event {
                        SessionEvent::Data { session_id, bytes } => {
                            if !sessions.contains_key(&session_id) {
                                // agent closed it first, reader hasn't noticed
                                continue;
                            }
                            SocksPacket::data(session_id, &bytes)
                        }
                        SessionEvent::Closed { session_id } => {
                            if sessions.remove(&session_id).is_none() {
                                continue;
                            }
                            tombstones.insert(session_id.clone());
                            SocksPacket::close(session_id)
                        }
                    };
                    let data = match frame.to_json() {
                        Ok(data) => data,
                        Err(err) => {
                            warn!(%err, "dropping unencodable session packet");
                            continue;
                        }
                    };
                    if ctx.outbound.send(JobFrame { job_id: ctx.job_id, data }).await.is_err() {
                        break;
                    }
                }
                inbound = ctx.inbound.recv() => {
                    let Some(raw) = inbound else { break };
                    handle_agent_packet(&raw, &mut sessions, &mut tombstones).await;
                }
            }
        }

        debug!(job_id = ctx.job_id, "SOCKS5 listener job stopped");
        Ok(())
    }
}

async fn handle_agent_packet(
    raw: &str,
    sessions: &mut HashMap<String, OwnedWriteHalf>,
    tombstones: &mut HashSet<String>,
) {
    let packet = match SocksPacket::from_json(raw) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(%err, "dropping malformed session packet");
            return;
        }
    };

    if packet.is_close() {
        match sessions.remove(&packet.session_id) {
            Some(mut write_half) => {
                let _ = write_half.shutdown().await;
                tombstones.insert(packet.session_id);
            }
            None => debug!(session = %packet.session_id, "close for unknown session"),
        }
        return;
    }

    let bytes = match packet.payload() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return,
        Err(err) => {
            warn!(session = %packet.session_id, %err, "dropping malformed session packet");
            return;
        }
    };

    match sessions.get_mut(&packet.session_id) {
        Some(write_half) => {
            let write = async {
                write_half.write_all(&bytes).await?;
                write_half.flush().await
            };
            if let Err(err) = write.await {
                debug!(session = %packet.session_id, %err, "client write failed");
                sessions.remove(&packet.session_id);
                tombstones.insert(packet.session_id);
            }
        }
        None if tombstones.contains(&packet.session_id) => {
            warn!(session = %packet.session_id, "dropping packet for closed session");
        }
        None => {
            // sessions only ever originate here, so this id is bogus
            warn!(session = %packet.session_id, "dropping packet for unknown session");
        }
    }
}

async fn read_session(
    session_id: String,
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut buf = [0u8; RELAY_BUF_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let event = SessionEvent::Data {
                    session_id: session_id.clone(),
                    bytes: Bytes::copy_from_slice(&buf[..n]),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
    let _ = events.send(SessionEvent::Closed { session_id }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn spawn_listener() -> (SocketAddr, mpsc::Sender<String>, mpsc::Receiver<JobFrame>) {
        let listener = SocksListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbound_tx, inbound) = mpsc::channel(16);
        let (outbound, outbound_rx) = mpsc::channel(16);
        let ctx = JobContext {
            job_id: 0,
            inbound,
            outbound,
        };
        tokio::spawn(Box::new(listener).run(ctx));
        (addr, inbound_tx, outbound_rx)
    }

    async fn recv_packet(rx: &mut mpsc::Receiver<JobFrame>) -> SocksPacket {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("worker gone");
        SocksPacket::from_json(&frame.data).unwrap()
    }

    #[tokio::test]
    async fn test_client_bytes_become_packets() {
        let (addr, _inbound, mut outbound) = spawn_listener().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        let packet = recv_packet(&mut outbound).await;
        assert_eq!(
            packet.payload().unwrap().unwrap().as_ref(),
            &[0x05, 0x01, 0x00]
        );
    }

    #[tokio::test]
    async fn test_agent_packets_reach_client() {
        let (addr, inbound, mut outbound) = spawn_listener().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let packet = recv_packet(&mut outbound).await;
        let session_id = packet.session_id;

        let reply = SocksPacket::data(session_id, &[0x05, 0x00]);
        inbound.send(reply.to_json().unwrap()).await.unwrap();

        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_client_disconnect_emits_close() {
        let (addr, _inbound, mut outbound) = spawn_listener().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let packet = recv_packet(&mut outbound).await;
        let session_id = packet.session_id;

        drop(client);
        let close = recv_packet(&mut outbound).await;
        assert_eq!(close.session_id, session_id);
        assert!(close.is_close());
    }

    #[tokio::test]
    async fn test_close_from_agent_shuts_client_down() {
        let (addr, inbound, mut outbound) = spawn_listener().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let packet = recv_packet(&mut outbound).await;

        inbound
            .send(SocksPacket::close(packet.session_id).to_json().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_packet_is_dropped() {
        let (addr, inbound, mut outbound) = spawn_listener().await;

        inbound
            .send(SocksPacket::data("no-such", b"x").to_json().unwrap())
            .await
            .unwrap();

        // the listener keeps serving afterwards
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"y").await.unwrap();
        let packet = recv_packet(&mut outbound).await;
        assert_eq!(packet.payload().unwrap().unwrap().as_ref(), b"y");
    }
}
