//! Policy Spec Sync Controller
//!
//! Mirrors `Policy` specs from a hub cluster onto a managed cluster:
//! - creates and updates the managed copy whenever the hub spec changes
//! - deletes the managed copy before releasing the hub object's finalizer
//! - removes managed policies whose hub source no longer exists

mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod health;
mod metrics;
mod reconciler;
mod watcher;
mod workqueue;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Policy Spec Sync Controller {}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Hub kubeconfig: {}", config.hub_kubeconfig.as_deref().unwrap_or("(default)"));
    info!("  Managed kubeconfig: {}", config.managed_kubeconfig.as_deref().unwrap_or("(default)"));
    info!("  Namespaces: {}", config.namespace_scope());
    info!("  Workers: {}", config.workers);
    info!("  Resync period: {:?}", config.resync_period);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
