//! Job workers and the module registry
//!
//! A job is a named worker running on one side of the control channel. Each
//! worker owns a bounded inbound queue of opaque `JobData` strings and shares
//! the connection-wide outbound queue. The registry of module names is closed:
//! `echo` and `socks5`.

pub mod echo;
pub mod socks5;

use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use echo::{EchoAgent, EchoServer};
use socks5::{SessionSettings, SocksAgent, SocksListener};

/// Capacity of each job's inbound queue and of the shared outbound queue
pub const JOB_QUEUE_CAPACITY: usize = 64;

/// An outbound data frame emitted by a job.
///
/// The driver wraps it into a `JobData` command or reply depending on which
/// side of the connection it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFrame {
    /// The emitting job
    pub job_id: u64,
    /// Opaque payload, owned by the module
    pub data: String,
}

/// Everything a worker needs to run: its id and its two queues
pub struct JobContext {
    /// Connection-scoped job id
    pub job_id: u64,
    /// Opaque inbound data; channel close means the job was stopped
    pub inbound: mpsc::Receiver<String>,
    /// Shared outbound queue toward the control channel
    pub outbound: mpsc::Sender<JobFrame>,
}

/// A runnable job worker for one side of the connection
#[async_trait]
pub trait JobWorker: Send {
    /// Run until the inbound queue closes or the work is done
    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()>;
}

/// The closed registry of module names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Demo module: agent echoes whatever the server sends
    Echo,
    /// Reverse SOCKS5 tunnel
    Socks5,
}

impl ModuleKind {
    /// Look up a module by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(ModuleKind::Echo),
            "socks5" => Some(ModuleKind::Socks5),
            _ => None,
        }
    }

    /// The wire name of this module
    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Echo => "echo",
            ModuleKind::Socks5 => "socks5",
        }
    }

    /// Instantiate the agent-side worker for this module
    pub fn agent_worker(self, settings: &SessionSettings) -> Box<dyn JobWorker> {
        match self {
            ModuleKind::Echo => Box::new(EchoAgent),
            ModuleKind::Socks5 => Box::new(SocksAgent::new(settings.clone())),
        }
    }

    /// Instantiate the server-side worker for this module
    pub async fn server_worker(self, socks_listen: SocketAddr) -> Result<Box<dyn JobWorker>> {
        Ok(match self {
            ModuleKind::Echo => Box::new(EchoServer::default()),
            ModuleKind::Socks5 => Box::new(SocksListener::bind(socks_listen).await?),
        })
    }
}

/// A running job: its inbound queue plus the detached worker task.
///
/// Dropping the handle closes the inbound queue, which is how `StopJob` is
/// delivered: the worker observes the close and exits on its own.
pub struct JobHandle {
    module: ModuleKind,
    inbound: mpsc::Sender<String>,
    _task: JoinHandle<()>,
}

impl JobHandle {
    /// The module this job runs
    pub fn module(&self) -> ModuleKind {
        self.module
    }

    /// Deliver one inbound frame; `false` means the worker already exited
    pub async fn deliver(&self, data: String) -> bool {
        self.inbound.send(data).await.is_ok()
    }
}

/// Spawn a worker and return its handle
pub fn spawn_job(
    worker: Box<dyn JobWorker>,
    module: ModuleKind,
    job_id: u64,
    outbound: mpsc::Sender<JobFrame>,
) -> JobHandle {
    let (inbound_tx, inbound_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let ctx = JobContext {
        job_id,
        inbound: inbound_rx,
        outbound,
    };
    let task = tokio::spawn(async move {
        if let Err(err) = worker.run(ctx).await {
            error!(job_id, module = module.name(), %err, "job worker failed");
        }
    });
    JobHandle {
        module,
        inbound: inbound_tx,
        _task: task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_closed() {
        assert_eq!(ModuleKind::from_name("echo"), Some(ModuleKind::Echo));
        assert_eq!(ModuleKind::from_name("socks5"), Some(ModuleKind::Socks5));
        assert_eq!(ModuleKind::from_name("shell"), None);
        assert_eq!(ModuleKind::from_name(""), None);
    }

    #[test]
    fn test_names_roundtrip() {
        for kind in [ModuleKind::Echo, ModuleKind::Socks5] {
            assert_eq!(ModuleKind::from_name(kind.name()), Some(kind));
        }
    }
}
