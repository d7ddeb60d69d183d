//! Agent-side SOCKS5 job: the session multiplexer
//!
//! Demultiplexes inbound packets by session id. The first data packet for an
//! unseen id spins up a fresh SOCKS engine on a queue-backed stream; the
//! close sentinel delivers EOF and retires the id. Retired ids go into a
//! tombstone set so that late packets are recognized and dropped with a
//! warning instead of resurrecting the session.

use crate::services::socks5::packet::SocksPacket;
use crate::services::socks5::session::{serve_session, SessionSettings};
use crate::services::socks5::stream::QueueStream;
use crate::services::{JobContext, JobFrame, JobWorker, JOB_QUEUE_CAPACITY};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Agent-side SOCKS5 worker
pub struct SocksAgent {
    settings: SessionSettings,
}

impl SocksAgent {
    /// Create a worker that serves sessions with the given engine settings
    pub fn new(settings: SessionSettings) -> Self {
        SocksAgent { settings }
    }
}

#[async_trait]
impl JobWorker for SocksAgent {
    async fn run(self: Box<Self>, mut ctx: JobContext) -> Result<()> {
        // engines write packets here; the loop below forwards them outbound
        let (packet_tx, mut packet_rx) = mpsc::channel::<SocksPacket>(JOB_QUEUE_CAPACITY);
        let mut sessions: HashMap<String, mpsc::Sender<Option<Bytes>>> = HashMap::new();
        let mut tombstones: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                inbound = ctx.inbound.recv() => {
                    let Some(raw) = inbound else { break };
                    self.handle_inbound(
                        &raw,
                        &mut sessions,
                        &mut tombstones,
                        &packet_tx,
                    )
                    .await;
                }
                packet = packet_rx.recv() => {
                    // packet_tx lives in this scope, so the channel never closes
                    let Some(packet) = packet else { break };
                    if packet.is_close() {
                        if sessions.remove(&packet.session_id).is_some() {
                            tombstones.insert(packet.session_id.clone());
                        } else if !tombstones.insert(packet.session_id.clone()) {
                            // second close from the engine teardown, peer knows
                            continue;
                        }
                    } else if tombstones.contains(&packet.session_id) {
                        continue;
                    }
                    let data = match packet.to_json() {
                        Ok(data) => data,
                        Err(err) => {
                            warn!(%err, "dropping unencodable session packet");
                            continue;
                        }
                    };
                    let frame = JobFrame { job_id: ctx.job_id, data };
                    if ctx.outbound.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(job_id = ctx.job_id, "SOCKS5 agent job stopped");
        Ok(())
    }
}

impl SocksAgent {
    async fn handle_inbound(
        &self,
        raw: &str,
        sessions: &mut HashMap<String, mpsc::Sender<Option<Bytes>>>,
        tombstones: &mut HashSet<String>,
        packet_tx: &mpsc::Sender<SocksPacket>,
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
                Some(feed) => {
                    let _ = feed.send(None).await;
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

        if tombstones.contains(&packet.session_id) {
            warn!(session = %packet.session_id, "dropping packet for closed session");
            return;
        }

        if let Some(feed) = sessions.get(&packet.session_id) {
            if feed.send(Some(bytes)).await.is_err() {
                // engine died mid-session; its teardown close is in flight
                sessions.remove(&packet.session_id);
                tombstones.insert(packet.session_id);
            }
            return;
        }

        // first packet of a new session: spin up an engine
        let session_id = packet.session_id;
        debug!(session = %session_id, "new SOCKS5 session");
        let (stream, feed) = QueueStream::new(session_id.clone(), packet_tx.clone());
        let _ = feed.send(Some(bytes)).await;
        sessions.insert(session_id.clone(), feed);

        let settings = self.settings.clone();
        let teardown = packet_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_session(stream, &settings).await {
                debug!(session = %session_id, %err, "SOCKS5 session ended with error");
            }
            // covers engines that die before the relay sends the sentinel
            let _ = teardown.send(SocksPacket::close(session_id)).await;
        });
    }
}
