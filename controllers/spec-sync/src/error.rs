//! Controller-specific error types.
//!
//! Every client failure is wrapped with the cluster it came from so the
//! reconcile boundary can classify it and attribute it for health reporting.

use policy_client::{ErrorClass, PolicyClientError};
use std::fmt;
use thiserror::Error;

/// The two API servers the controller talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cluster {
    Hub,
    Managed,
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cluster::Hub => f.write_str("hub"),
            Cluster::Managed => f.write_str("managed"),
        }
    }
}

/// Errors that can occur in the Policy Spec Sync Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Hub API call failed
    #[error("hub cluster: {0}")]
    Hub(PolicyClientError),

    /// Managed API call failed
    #[error("managed cluster: {0}")]
    Managed(PolicyClientError),

    /// Kubernetes client construction failed
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe or metrics server failed
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Classification used by the reconcile boundary.
    ///
    /// Only client errors are reconcile-time errors; everything else happens at
    /// startup and is treated as fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            ControllerError::Hub(e) | ControllerError::Managed(e) => e.class(),
            _ => ErrorClass::Fatal,
        }
    }

    /// Cluster the error is attributed to, if any
    pub fn cluster(&self) -> Option<Cluster> {
        match self {
            ControllerError::Hub(_) => Some(Cluster::Hub),
            ControllerError::Managed(_) => Some(Cluster::Managed),
            _ => None,
        }
    }

    /// Optimistic-concurrency conflict against either cluster
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Hub(e) | ControllerError::Managed(e) if e.is_conflict())
    }

    pub(crate) fn hub(err: PolicyClientError) -> Self {
        ControllerError::Hub(err)
    }

    pub(crate) fn managed(err: PolicyClientError) -> Self {
        ControllerError::Managed(err)
    }
}
