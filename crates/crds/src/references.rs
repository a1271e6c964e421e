//! Policy references
//!
//! A `PolicyRef` addresses at most one policy on the hub and at most one
//! policy on the managed cluster. It is the work queue key of the controller.

use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::Policy;

/// Namespace/name pair identifying a policy on either cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRef {
    /// Namespace of the policy
    pub namespace: String,

    /// Name of the policy
    pub name: String,
}

/// A `namespace/name` string that could not be parsed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid policy reference {0:?}, expected <namespace>/<name>")]
pub struct InvalidPolicyRef(pub String);

impl PolicyRef {
    /// Create a new reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reference to the object itself. `None` for cluster-scoped or unnamed objects.
    pub fn from_policy(policy: &Policy) -> Option<Self> {
        let namespace = policy.namespace().filter(|ns| !ns.is_empty())?;
        let name = policy.metadata.name.clone().filter(|n| !n.is_empty())?;
        Some(Self { namespace, name })
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for PolicyRef {
    type Err = InvalidPolicyRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(InvalidPolicyRef(s.to_string())),
        }
    }
}
