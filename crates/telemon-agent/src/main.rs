use std::sync::Arc;

use anyhow::{Context, Result};
use telemon_agent::{Agent, AgentConfig};
use telemon_collector::alloc::CountingAllocator;
use telemon_transport::{build_client, MetricsTransport};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    tracing::info!(config = %config_path, "telemon-agent starting");

    let stop = CancellationToken::new();
    let transport = Arc::new(
        build_client(&config.to_client_config(), stop.clone()).context("failed to build transport client")?,
    );
    tracing::info!(protocol = transport.protocol(), "Transport ready");

    if let Err(e) = transport.ping().await {
        tracing::warn!(error = %e, "Sink is not reachable yet");
    }

    let agent = Agent::new(&config, transport.clone(), stop.clone())?;

    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutting down gracefully");
                ctrl_c.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let stats = agent.run().await;

    if let Err(e) = transport.close().await {
        tracing::warn!(error = %e, "Failed to close transport");
    }
    tracing::info!(
        jobs_ok = stats.jobs_ok,
        jobs_failed = stats.jobs_failed,
        metrics_delivered = stats.metrics_delivered,
        "telemon-agent stopped"
    );
    Ok(())
}
