use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use clustermon::server::{self, TinyDnsProbe};
use clustermon::telemetry;

/// Answers liveness and DNS probes on behalf of the cluster's agents
#[derive(Parser, Debug)]
#[command(name = "clustermon-probe")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Host name whose resolution stands for DNS health
    #[arg(long, default_value = "server-1")]
    server_addr: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_json);
    tracing::info!(port = args.port, server_addr = %args.server_addr, "Starting clustermon-probe");

    let token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let signal_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
        }
        signal_token.cancel();
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    server::serve(addr, TinyDnsProbe::lookup(args.server_addr), token)
        .await
        .context("HTTP server failed")
}
