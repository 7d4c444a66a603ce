//! Node Agent
//!
//! Keeps the containers on one node in line with the pods desired for it:
//! - Desired pods come from manifest files and/or the apiserver
//! - Every pod gets a network container whose namespace the others join
//! - Containers whose spec changed or that fail their liveness probe are
//!   recreated, and anything no desired pod accounts for is killed
//!
//! A small HTTP server exposes pod status, stats, remote exec, logs, events
//! and metrics.

mod backoff;
mod config;
mod containers;
mod controller;
mod error;
mod events;
mod fingerprint;
mod health;
mod metrics;
mod naming;
mod network;
mod node;
mod reconciler;
mod server;
mod sources;
mod stats;
mod sync_loop;
mod volumes;
mod workers;

#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod sync_loop_test;

use anyhow::Context;
use config::AgentConfig;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest share rustls; pick the provider once for the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting node agent");

    let config = AgentConfig::from_env().context("loading configuration from the environment")?;
    info!("Configuration:");
    info!("  Hostname: {}", config.hostname);
    info!("  Docker endpoint: {}", config.docker_endpoint);
    info!("  Root dir: {}", config.root_dir.display());
    info!(
        "  Manifests: {}",
        config.manifest_path.as_ref().map_or("none".to_string(), |p| p.display().to_string())
    );
    info!("  Apiserver watch: {}", config.watch_apiserver);
    info!("  Listening on: {}", config.listen_addr);

    let controller = Controller::new(config).await.context("initializing node agent")?;
    controller.run().await?;

    Ok(())
}
