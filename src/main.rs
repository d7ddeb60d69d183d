//! Socksling - Reverse SOCKS5 tunneling proxy
//!
//! This is the main entry point for the Socksling application.

use anyhow::Result;
use clap::{Parser, Subcommand};
use socksling::config::load_config;
use socksling::{run_agent, run_server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Socksling - Reverse SOCKS5 tunneling proxy over a WebSocket control channel
#[derive(Parser, Debug)]
#[command(name = "socksling")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    role: Role,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_log: bool,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the server: SOCKS5 listener plus WebSocket control listener
    Server {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the agent: connect out to a server and serve its jobs
    Agent {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;
    info!("Socksling v{}", socksling::VERSION);

    let result = match &args.role {
        Role::Server { config } => {
            let config = load_config(config)?;
            tokio::select! {
                result = run_server(&config) => result,
                _ = shutdown_signal() => Ok(()),
            }
        }
        Role::Agent { config } => {
            let config = load_config(config)?;
            tokio::select! {
                result = run_agent(&config) => result,
                _ = shutdown_signal() => Ok(()),
            }
        }
    };

    info!("Socksling stopped");
    result
}

/// Resolve when the process is asked to stop
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging; RUST_LOG overrides the CLI level when set
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .init();
    }

    Ok(())
}
