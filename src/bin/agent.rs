use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use clustermon::backends::{AnyBackend, Backend};
use clustermon::collectors::cluster_status::DOCKER_RESERVED_MEMORY_METRIC;
use clustermon::collectors::{ClusterMemoryCollector, MetricPath, SwarmStatusClient};
use clustermon::config::AgentConfig;
use clustermon::health::{build_checkers, CheckContext};
use clustermon::scheduler::{Periods, Scheduler};
use clustermon::server::{self, TinyDnsProbe};
use clustermon::telemetry;

/// Samples cluster memory reservations and service health, and forwards
/// them to the configured metrics backend.
#[derive(Parser, Debug)]
#[command(name = "clustermon-agent")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "CLUSTERMON_CONFIG")]
    config: PathBuf,

    /// Port for the local HTTP server
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Probe server that `/api/v1/tinydns_status` forwards to
    #[arg(long, default_value = "server-1:8080")]
    server_addr: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_json);

    tracing::info!(config = %args.config.display(), port = args.port, "Starting clustermon-agent");
    if let Err(e) = run(args).await {
        tracing::error!(error = ?e, "clustermon-agent exited with error");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AgentConfig::load(&args.config).context("Failed to load configuration")?;

    let backend = AnyBackend::connect(&config.backend)
        .await
        .context("Failed to initialize metrics backend")?;
    tracing::info!(backend = backend.name(), "backend ready");
    let backend = Arc::new(Mutex::new(backend));

    let ctx = CheckContext {
        cluster: config.cluster_name.clone(),
        step: config.health_check_interval,
        timeout: config.check_timeout,
    };
    let checkers = build_checkers(&config.health_checks, &ctx).context("Failed to build health checkers")?;
    tracing::info!(checkers = checkers.len(), "health checkers registered");

    let status = SwarmStatusClient::new(config.swarm_info_url.clone(), config.check_timeout)
        .context("Failed to build cluster status client")?;
    let collector = ClusterMemoryCollector::new(
        status,
        MetricPath::new(DOCKER_RESERVED_MEMORY_METRIC)?,
        config.collect_interval,
    );

    let scheduler = Scheduler::new(
        backend.clone(),
        Arc::new(collector),
        checkers,
        Periods {
            collect: config.collect_period(),
            health_check: config.health_check_period(),
        },
    );

    let probe = TinyDnsProbe::proxy(&args.server_addr, config.check_timeout)
        .context("Failed to build probe client")?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    let token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let signal_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
        signal_token.cancel();
    });

    let server_token = token.clone();
    let server = tokio::spawn(async move {
        let result = server::serve(addr, probe, server_token.clone()).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "HTTP server failed, shutting down");
            server_token.cancel();
        }
        result
    });

    scheduler.run(token).await;
    let served = server.await.context("HTTP server task failed")?;

    backend
        .lock()
        .await
        .close()
        .await
        .context("Failed to close metrics backend")?;
    tracing::info!("clustermon-agent stopped");

    served.context("HTTP server failed")
}
