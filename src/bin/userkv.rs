//! userkv binary: single-process server, cluster primary, or cluster worker

use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userkv::common::{seed_records, Config, RunMode};
use userkv::coordinator::ProcessLauncher;
use userkv::worker::{RecordStore, WorkerServer};
use userkv::ClusterServer;

#[derive(Parser)]
#[command(name = "userkv")]
#[command(about = "User record service with round-robin workers")]
#[command(version)]
struct Cli {
    /// Run a load balancer in front of worker processes
    #[arg(long)]
    multi: bool,

    /// Public port (default 3000, or 4000 with --multi)
    #[arg(long)]
    port: Option<u16>,

    /// Number of worker processes (default: available cores)
    #[arg(long)]
    workers: Option<usize>,

    /// First worker port
    #[arg(long)]
    worker_port_base: Option<u16>,

    /// Config file (default: ./userkv.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cluster worker (started by the primary process)
    #[command(hide = true)]
    Worker {
        /// Worker slot index
        #[arg(long)]
        slot: usize,

        /// Interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind
        #[arg(long)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.port.is_some() {
        config.port = cli.port;
    }
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }
    if let Some(base) = cli.worker_port_base {
        config.worker_port_base = base;
    }
    config.validate()?;

    let is_worker = cli.command.is_some();
    init_tracing(&config.log_level, is_worker);

    match cli.command {
        Some(Commands::Worker { slot, host, port }) => {
            let server = WorkerServer::new(SocketAddr::new(host, port), config.max_body_bytes);
            server
                .serve_clustered(slot, tokio::io::stdin(), tokio::io::stdout())
                .await?;
        }
        None if cli.multi => {
            let mut launcher = ProcessLauncher::current_exe()?;
            if let Some(path) = &cli.config {
                launcher = launcher.with_args(vec![
                    "--config".to_string(),
                    path.display().to_string(),
                ]);
            }
            ClusterServer::new(config, launcher)
                .serve(shutdown_signal())
                .await?;
        }
        None => {
            let store = if config.seed {
                RecordStore::with_records(seed_records())
            } else {
                RecordStore::new()
            };
            WorkerServer::new(config.public_addr(RunMode::Single), config.max_body_bytes)
                .serve_standalone(store, shutdown_signal())
                .await?;
        }
    }

    Ok(())
}

/// Workers log to stderr: their stdout is the coordinator channel.
fn init_tracing(default_level: &str, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    let registry = tracing_subscriber::registry().with(filter);
    if to_stderr {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
