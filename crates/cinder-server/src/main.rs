//! cinder-server binary: parse flags, install logging, run the
//! orchestrator until the process is killed.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use cinder_server::config::{ServerConfig, DEFAULT_PORT, DEFAULT_WORKERS};
use cinder_server::Orchestrator;
use cinder_store::DEFAULT_PARTITIONS;

/// In-memory RESP key/value server.
#[derive(Parser)]
#[command(name = "cinder-server", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of store partitions.
    #[arg(long, default_value_t = DEFAULT_PARTITIONS)]
    partitions: usize,

    /// Worker threads per pipeline stage.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinder=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        partitions: args.partitions,
        workers: args.workers,
    };

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let mut orchestrator = match Orchestrator::start(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("could not start server: {e}");
            return ExitCode::FAILURE;
        }
    };

    orchestrator.wait();
    ExitCode::SUCCESS
}
