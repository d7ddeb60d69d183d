//! Server endpoint
//!
//! Accepts agent connections on the WebSocket listener, performs the
//! registration handshake, starts the `socks5` job, and then drives the
//! connection: one task per agent selects over inbound replies, the shared
//! outbound job queue, and the ping schedule. Teardown is by cascading
//! channel close; there is no broadcast cancellation.

use crate::config::{Config, ServerConfig};
use crate::protocol::{Command, Envelope, EnvelopeCodec, Reply};
use crate::services::{spawn_job, JobFrame, JobHandle, ModuleKind, JOB_QUEUE_CAPACITY};
use crate::transport::{accept_control, ControlStream};
use anyhow::{bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

type ControlSink = SplitSink<ControlStream, Message>;
type ControlSource = SplitStream<ControlStream>;

/// Run the server endpoint until the process is stopped
pub async fn run_server(config: &Config) -> Result<()> {
    let server = config.server()?.clone();
    let listener = TcpListener::bind(server.ws_listen)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", server.ws_listen))?;
    info!(addr = %server.ws_listen, "control listener ready");

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        info!(%peer, "agent connected");
        let codec = config.envelope.codec()?;
        let server = server.clone();
        tokio::spawn(async move {
            match serve_agent(stream, codec, server).await {
                Ok(()) => info!(%peer, "agent disconnected"),
                Err(err) => warn!(%peer, %err, "agent connection failed"),
            }
        });
    }
}

async fn serve_agent(stream: TcpStream, codec: EnvelopeCodec, config: ServerConfig) -> Result<()> {
    let ws = accept_control(stream).await?;
    let (mut sink, mut source) = ws.split();

    let client_id = register_agent(&mut sink, &mut source, &codec, &config).await?;
    info!(%client_id, "agent registered");

    let mut connection = AgentConnection::new(codec, config);
    connection.create_job(&mut sink, ModuleKind::Socks5).await?;
    connection.drive(&mut sink, &mut source).await
}

/// Send `Register` and require a `Registered` echo before anything else
async fn register_agent(
    sink: &mut ControlSink,
    source: &mut ControlSource,
    codec: &EnvelopeCodec,
    config: &ServerConfig,
) -> Result<String> {
    let client_id = Uuid::new_v4().to_string();
    let envelope = Envelope::new(Command::Register {
        client_id: client_id.clone(),
    });
    let correlation_id = envelope.correlation_id;
    sink.send(Message::Text(codec.encode_command(&envelope)?))
        .await?;

    let reply = timeout(config.pong_timeout(), async {
        loop {
            match source.next().await {
                Some(Ok(Message::Text(raw))) => return Ok(codec.decode_reply(&raw)?),
                Some(Ok(_)) => continue,
                Some(Err(err)) => bail!("control channel failed: {err}"),
                None => bail!("agent hung up during registration"),
            }
        }
    })
    .await
    .context("registration timed out")??;

    match reply.payload {
        Reply::Registered { client_id: echoed } if echoed == client_id => {
            if reply.correlation_id != correlation_id {
                bail!("registration reply has the wrong correlation id");
            }
            Ok(client_id)
        }
        Reply::Registered { client_id: echoed } => {
            bail!("registration echoed the wrong client id: {echoed}")
        }
        other => bail!("expected Registered, got {other:?}"),
    }
}

/// Per-agent connection state, owned by one driver task
struct AgentConnection {
    codec: EnvelopeCodec,
    config: ServerConfig,
    jobs: HashMap<u64, JobHandle>,
    pending: HashSet<&'static str>,
    outbound_tx: mpsc::Sender<JobFrame>,
    outbound_rx: mpsc::Receiver<JobFrame>,
}

impl AgentConnection {
    fn new(codec: EnvelopeCodec, config: ServerConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        AgentConnection {
            codec,
            config,
            jobs: HashMap::new(),
            pending: HashSet::new(),
            outbound_tx,
            outbound_rx,
        }
    }

    /// Ask the agent to create a job; the worker spawns on `JobCreated`
    async fn create_job(&mut self, sink: &mut ControlSink, kind: ModuleKind) -> Result<()> {
        self.pending.insert(kind.name());
        let envelope = Envelope::new(Command::CreateJob {
            module_name: kind.name().to_string(),
        });
        sink.send(Message::Text(self.codec.encode_command(&envelope)?))
            .await?;
        Ok(())
    }

    async fn drive(&mut self, sink: &mut ControlSink, source: &mut ControlSource) -> Result<()> {
        let mut ping_ticker = interval(self.config.ping_interval());
        ping_ticker.tick().await; // the immediate first tick
        let pong_timeout = self.config.pong_timeout();
        let mut ping_sent: Option<Instant> = None;

        loop {
            let pong_deadline = async move {
                match ping_sent {
                    Some(at) => sleep_until(at + pong_timeout).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                message = source.next() => match message {
                    Some(Ok(Message::Text(raw))) => self.handle_reply(&raw).await,
                    Some(Ok(Message::Pong(_))) => ping_sent = None,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => bail!("control channel failed: {err}"),
                },
                frame = self.outbound_rx.recv() => {
                    // outbound_tx is held by self, the channel cannot close
                    let Some(frame) = frame else { return Ok(()) };
                    let envelope = Envelope::new(Command::JobData {
                        job_id: frame.job_id,
                        data: frame.data,
                    });
                    sink.send(Message::Text(self.codec.encode_command(&envelope)?))
                        .await?;
                }
                _ = ping_ticker.tick() => {
                    if ping_sent.is_none() {
                        sink.send(Message::Ping(Vec::new())).await?;
                        ping_sent = Some(Instant::now());
                    }
                }
                _ = pong_deadline => {
                    bail!("agent missed the pong deadline, tearing down");
                }
            }
        }
    }

    async fn handle_reply(&mut self, raw: &str) {
        let envelope = match self.codec.decode_reply(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "dropping undecodable reply");
                return;
            }
        };

        match envelope.payload {
            Reply::JobCreated { job_id, module_name } => {
                self.handle_job_created(job_id, &module_name).await;
            }
            Reply::JobData { job_id, data } => match self.jobs.get(&job_id) {
                Some(job) => {
                    if !job.deliver(data).await {
                        debug!(job_id, "worker exited, removing job");
                        self.jobs.remove(&job_id);
                    }
                }
                None => debug!(job_id, "data for unknown job, dropping"),
            },
            Reply::JobStopped { job_id } => {
                self.jobs.remove(&job_id);
                info!(job_id, "job stopped");
            }
            Reply::Error(message) => warn!(%message, "agent reported an error"),
            Reply::Ok => {}
            Reply::Registered { .. } => {
                warn!("unexpected Registered after the handshake, dropping");
            }
        }
    }

    async fn handle_job_created(&mut self, job_id: u64, module_name: &str) {
        let Some(kind) = ModuleKind::from_name(module_name) else {
            warn!(%module_name, "JobCreated for unknown module, dropping");
            return;
        };
        if !self.pending.remove(kind.name()) {
            warn!(%module_name, job_id, "JobCreated without a pending request, dropping");
            return;
        }
        match kind.server_worker(self.config.socks_listen).await {
            Ok(worker) => {
                info!(job_id, module = module_name, "job created");
                self.jobs
                    .insert(job_id, spawn_job(worker, kind, job_id, self.outbound_tx.clone()));
            }
            Err(err) => warn!(job_id, module = module_name, %err, "failed to start job worker"),
        }
    }
}
