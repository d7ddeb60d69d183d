//! Echo module, the demo entry in the registry
//!
//! The agent side sends every inbound frame straight back. The server side
//! emits a numbered greeting on a timer and logs whatever comes back.

use crate::services::{JobContext, JobFrame, JobWorker};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Agent-side echo worker
pub struct EchoAgent;

#[async_trait]
impl JobWorker for EchoAgent {
    async fn run(self: Box<Self>, mut ctx: JobContext) -> Result<()> {
        while let Some(data) = ctx.inbound.recv().await {
            debug!(job_id = ctx.job_id, len = data.len(), "echoing frame");
            if ctx
                .outbound
                .send(JobFrame {
                    job_id: ctx.job_id,
                    data,
                })
                .await
                .is_err()
            {
                break;
            }
        }
        Ok(())
    }
}

/// Server-side echo worker: periodic greeting, logged replies
pub struct EchoServer {
    greet_interval: Duration,
}

impl Default for EchoServer {
    fn default() -> Self {
        EchoServer {
            greet_interval: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl JobWorker for EchoServer {
    async fn run(self: Box<Self>, mut ctx: JobContext) -> Result<()> {
        let mut ticker = interval(self.greet_interval);
        let mut sequence = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = JobFrame {
                        job_id: ctx.job_id,
                        data: format!("hello {sequence}"),
                    };
                    sequence += 1;
                    if ctx.outbound.send(frame).await.is_err() {
                        break;
                    }
                }
                reply = ctx.inbound.recv() => match reply {
                    Some(data) => info!(job_id = ctx.job_id, %data, "echo reply"),
                    None => break,
                },
            }
        }
        Ok(())
    }
}
