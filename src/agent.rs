//! Agent endpoint
//!
//! Dials the server's control endpoint (optionally through an HTTP CONNECT
//! proxy), answers the registration handshake, and then serves commands:
//! creating jobs from the module registry, routing `JobData` to workers, and
//! stopping jobs on request. One connection attempt; when the control channel
//! dies, `run_agent` returns.

use crate::config::Config;
use crate::protocol::{Command, Envelope, EnvelopeCodec, Reply};
use crate::services::socks5::SessionSettings;
use crate::services::{spawn_job, JobFrame, JobHandle, ModuleKind, JOB_QUEUE_CAPACITY};
use crate::transport::{connect_control, ControlStream};
use anyhow::{bail, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

type ControlSink = SplitSink<ControlStream, Message>;
type ControlSource = SplitStream<ControlStream>;

/// Run the agent endpoint until the control channel closes
pub async fn run_agent(config: &Config) -> Result<()> {
    let agent = config.agent()?;
    let codec = config.envelope.codec()?;
    let settings = agent.session_settings()?;

    let ws = connect_control(&agent.server_url, agent.http_proxy.as_deref()).await?;
    info!(server = %agent.server_url, "control channel open");
    let (mut sink, mut source) = ws.split();

    let mut connection = ServerConnection::new(codec, settings);
    connection.drive(&mut sink, &mut source).await
}

/// Connection state on the agent side, owned by one driver task
struct ServerConnection {
    codec: EnvelopeCodec,
    settings: SessionSettings,
    jobs: HashMap<u64, JobHandle>,
    next_job_id: u64,
    outbound_tx: mpsc::Sender<JobFrame>,
    outbound_rx: mpsc::Receiver<JobFrame>,
}

impl ServerConnection {
    fn new(codec: EnvelopeCodec, settings: SessionSettings) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        ServerConnection {
            codec,
            settings,
            jobs: HashMap::new(),
            next_job_id: 0,
            outbound_tx,
            outbound_rx,
        }
    }

    async fn drive(&mut self, sink: &mut ControlSink, source: &mut ControlSource) -> Result<()> {
        loop {
            tokio::select! {
                message = source.next() => match message {
                    Some(Ok(Message::Text(raw))) => {
                        if let Some(reply) = self.handle_command(&raw).await {
                            sink.send(Message::Text(self.codec.encode_reply(&reply)?))
                                .await?;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("control channel closed");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => bail!("control channel failed: {err}"),
                },
                frame = self.outbound_rx.recv() => {
                    // outbound_tx is held by self, the channel cannot close
                    let Some(frame) = frame else { return Ok(()) };
                    let envelope = Envelope::new(Reply::JobData {
                        job_id: frame.job_id,
                        data: frame.data,
                    });
                    sink.send(Message::Text(self.codec.encode_reply(&envelope)?))
                        .await?;
                }
            }
        }
    }

    /// Handle one command; the returned envelope, if any, goes back out
    async fn handle_command(&mut self, raw: &str) -> Option<Envelope<Reply>> {
        let envelope = match self.codec.decode_command(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "dropping undecodable command");
                return None;
            }
        };

        match envelope.payload {
            Command::Register { client_id } => {
                info!(%client_id, "registered with server");
                // the registration reply echoes the command's correlation id
                Some(Envelope::with_id(
                    envelope.correlation_id,
                    Reply::Registered { client_id },
                ))
            }
            Command::CreateJob { module_name } => {
                let Some(kind) = ModuleKind::from_name(&module_name) else {
                    warn!(%module_name, "CreateJob for unknown module, dropping");
                    return None;
                };
                let job_id = self.next_job_id;
                self.next_job_id += 1;
                let worker = kind.agent_worker(&self.settings);
                self.jobs
                    .insert(job_id, spawn_job(worker, kind, job_id, self.outbound_tx.clone()));
                info!(job_id, module = %module_name, "job created");
                Some(Envelope::new(Reply::JobCreated {
                    job_id,
                    module_name,
                }))
            }
            Command::StopJob { job_id } => {
                if self.jobs.remove(&job_id).is_some() {
                    info!(job_id, "job stopped");
                    Some(Envelope::new(Reply::JobStopped { job_id }))
                } else {
                    warn!(job_id, "StopJob for unknown job, dropping");
                    None
                }
            }
            Command::JobData { job_id, data } => {
                match self.jobs.get(&job_id) {
                    Some(job) => {
                        if !job.deliver(data).await {
                            debug!(job_id, "worker exited, removing job");
                            self.jobs.remove(&job_id);
                        }
                    }
                    None => debug!(job_id, "data for unknown job, dropping"),
                }
                None
            }
            Command::Error(message) => {
                warn!(%message, "server reported an error");
                None
            }
            Command::Ok => None,
        }
    }
}
