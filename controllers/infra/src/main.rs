//! Infrastructure Controller
//!
//! Reconciles cluster infrastructure against the cloud provider:
//! - CloudCluster: network topology, security groups, API endpoint, bastion
//! - CloudMachine / CloudServer: node instances with ports, volumes and addresses
//! - FloatingIPPool: floating IPs handed out to IPAddressClaims

mod backoff;
mod config;
mod controller;
mod error;
mod reconciler;
mod retry;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        error!("Failed to install rustls crypto provider: {:?}", e);
    }

    info!("Starting infrastructure controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Network API: {}", config.endpoints.network);
    info!("  Compute API: {}", config.endpoints.compute);
    info!("  Load balancer API: {}", config.endpoints.load_balancer);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
