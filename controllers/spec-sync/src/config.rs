//! Controller configuration.
//!
//! All settings come from environment variables. Parsing goes through a lookup
//! function so tests can supply values without touching the process
//! environment.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the spec sync controller
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Kubeconfig for the hub cluster; `None` infers (in-cluster or default kubeconfig)
    pub hub_kubeconfig: Option<String>,
    /// Kubeconfig for the managed cluster; `None` infers
    pub managed_kubeconfig: Option<String>,
    /// Namespaces to watch on both clusters; empty means all namespaces
    pub namespaces: Vec<String>,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Interval between full resyncs of both clusters
    pub resync_period: Duration,
    /// First retry delay after a transient failure
    pub backoff_base: Duration,
    /// Upper bound for retry delays
    pub backoff_max: Duration,
    /// Consecutive failures against one cluster before health is degraded
    pub degraded_threshold: u32,
    /// Bind address of the health/readiness server
    pub probe_addr: SocketAddr,
    /// Bind address of the metrics server
    pub metrics_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub_kubeconfig: None,
            managed_kubeconfig: None,
            namespaces: Vec::new(),
            workers: 4,
            resync_period: Duration::from_secs(300),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            degraded_threshold: 5,
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8384)),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let namespaces = non_empty("WATCH_NAMESPACE")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let workers = parse_or(&non_empty, "SYNC_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "SYNC_WORKERS must be at least 1".to_string(),
            ));
        }

        let resync_period = Duration::from_secs(parse_or(
            &non_empty,
            "RESYNC_PERIOD_SECONDS",
            defaults.resync_period.as_secs(),
        )?);
        if resync_period.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "RESYNC_PERIOD_SECONDS must be at least 1".to_string(),
            ));
        }

        let backoff_base = Duration::from_millis(parse_or(
            &non_empty,
            "BACKOFF_BASE_MILLIS",
            defaults.backoff_base.as_millis() as u64,
        )?);
        let backoff_max = Duration::from_secs(parse_or(
            &non_empty,
            "BACKOFF_MAX_SECONDS",
            defaults.backoff_max.as_secs(),
        )?);
        if backoff_base.is_zero() || backoff_base > backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_BASE_MILLIS ({:?}) must be positive and not exceed BACKOFF_MAX_SECONDS ({:?})",
                backoff_base, backoff_max
            )));
        }

        Ok(Self {
            hub_kubeconfig: non_empty("HUB_CONFIG"),
            managed_kubeconfig: non_empty("MANAGED_CONFIG"),
            namespaces,
            workers,
            resync_period,
            backoff_base,
            backoff_max,
            degraded_threshold: parse_or(&non_empty, "DEGRADED_THRESHOLD", defaults.degraded_threshold)?,
            probe_addr: parse_or(&non_empty, "PROBE_ADDR", defaults.probe_addr)?,
            metrics_addr: parse_or(&non_empty, "METRICS_ADDR", defaults.metrics_addr)?,
        })
    }

    /// Human-readable watch scope for startup logs
    pub fn namespace_scope(&self) -> String {
        if self.namespaces.is_empty() {
            "all namespaces".to_string()
        } else {
            self.namespaces.join(",")
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
