//! Liveness and readiness signal.
//!
//! The reconciler reports every outcome against the cluster it concerns.
//! Health is degraded while either cluster has a failure streak at or above
//! the configured threshold, or has produced a fatal error that no later
//! success against that cluster has cleared.

use crate::error::Cluster;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use policy_client::ErrorClass;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct ClusterHealth {
    failure_streak: AtomicU32,
    fatal: AtomicBool,
}

#[derive(Debug)]
pub struct HealthState {
    hub: ClusterHealth,
    managed: ClusterHealth,
    hub_synced: AtomicBool,
    managed_synced: AtomicBool,
    threshold: u32,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

/// Per-cluster view served by `/healthz`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub failure_streak: u32,
    pub fatal: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub ready: bool,
    pub hub: ClusterSnapshot,
    pub managed: ClusterSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

impl HealthState {
    pub fn new(threshold: u32) -> Self {
        Self {
            hub: ClusterHealth::default(),
            managed: ClusterHealth::default(),
            hub_synced: AtomicBool::new(false),
            managed_synced: AtomicBool::new(false),
            threshold: threshold.max(1),
            last_success: Mutex::new(None),
        }
    }

    fn cluster(&self, cluster: Cluster) -> &ClusterHealth {
        match cluster {
            Cluster::Hub => &self.hub,
            Cluster::Managed => &self.managed,
        }
    }

    /// A call against `cluster` succeeded; clears its streak and fatal flag
    pub fn record_success(&self, cluster: Cluster) {
        let health = self.cluster(cluster);
        let previous = health.failure_streak.swap(0, Ordering::Relaxed);
        let was_fatal = health.fatal.swap(false, Ordering::Relaxed);
        if previous >= self.threshold || was_fatal {
            info!("{} cluster recovered after {} failures", cluster, previous);
        }
        if let Ok(mut last) = self.last_success.lock() {
            *last = Some(Utc::now());
        }
    }

    /// A call against `cluster` failed. Not-found is a valid state and is
    /// ignored.
    pub fn record_failure(&self, cluster: Cluster, class: ErrorClass) {
        let health = self.cluster(cluster);
        match class {
            ErrorClass::NotFound => {}
            ErrorClass::Transient => {
                let streak = health.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
                if streak == self.threshold {
                    warn!(
                        "{} cluster degraded: {} consecutive transient failures",
                        cluster, streak
                    );
                }
            }
            ErrorClass::Fatal => {
                health.failure_streak.fetch_add(1, Ordering::Relaxed);
                if !health.fatal.swap(true, Ordering::Relaxed) {
                    warn!("{} cluster degraded: fatal error observed", cluster);
                }
            }
        }
    }

    pub fn is_cluster_degraded(&self, cluster: Cluster) -> bool {
        let health = self.cluster(cluster);
        health.fatal.load(Ordering::Relaxed)
            || health.failure_streak.load(Ordering::Relaxed) >= self.threshold
    }

    pub fn is_degraded(&self) -> bool {
        self.is_cluster_degraded(Cluster::Hub) || self.is_cluster_degraded(Cluster::Managed)
    }

    /// Called by a watcher once its initial list has been delivered
    pub fn mark_synced(&self, cluster: Cluster) {
        let flag = match cluster {
            Cluster::Hub => &self.hub_synced,
            Cluster::Managed => &self.managed_synced,
        };
        if !flag.swap(true, Ordering::Relaxed) {
            info!("{} watcher completed initial list", cluster);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.hub_synced.load(Ordering::Relaxed) && self.managed_synced.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let cluster = |c: Cluster| {
            let health = self.cluster(c);
            ClusterSnapshot {
                failure_streak: health.failure_streak.load(Ordering::Relaxed),
                fatal: health.fatal.load(Ordering::Relaxed),
            }
        };
        HealthSnapshot {
            healthy: !self.is_degraded(),
            ready: self.is_ready(),
            hub: cluster(Cluster::Hub),
            managed: cluster(Cluster::Managed),
            last_success: self.last_success.lock().ok().and_then(|last| *last),
        }
    }
}

async fn handle_healthz(State(health): State<Arc<HealthState>>) -> impl IntoResponse {
    let snapshot = health.snapshot();
    let status = if snapshot.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

async fn handle_readyz(State(health): State<Arc<HealthState>>) -> impl IntoResponse {
    if health.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for initial sync")
    }
}

pub fn probe_router(health: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/readyz", get(handle_readyz))
        .with_state(health)
}

/// Serve `/healthz` and `/readyz` until `shutdown` resolves
pub async fn serve_probes<F>(
    addr: SocketAddr,
    health: Arc<HealthState>,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind probe server on {}: {}", addr, e);
        e
    })?;
    info!("Probe server listening on {}", addr);

    axum::serve(listener, probe_router(health))
        .with_graceful_shutdown(shutdown)
        .await
}
