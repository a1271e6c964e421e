//! PolicyClient trait for mocking
//!
//! Abstracts a single cluster's Policy API so the reconciler can run against
//! either a real API server or an in-memory mock.

use crate::error::PolicyClientError;
use crds::{Policy, PolicyRef};

/// Trait for Policy API operations against one cluster
///
/// Implementations must be safe for concurrent use by every reconcile worker.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait PolicyClientTrait: Send + Sync {
    /// Human-readable cluster name used in logs ("hub", "managed")
    fn cluster_name(&self) -> &str;

    /// Fetch a policy. Absence is reported as `PolicyClientError::NotFound`.
    async fn get(&self, policy_ref: &PolicyRef) -> Result<Policy, PolicyClientError>;

    /// Create a policy. An existing object yields `PolicyClientError::Conflict`.
    async fn create(&self, policy: &Policy) -> Result<Policy, PolicyClientError>;

    /// Replace a policy. `metadata.resourceVersion` must match the stored
    /// object, otherwise `PolicyClientError::Conflict` is returned.
    async fn update(&self, policy: &Policy) -> Result<Policy, PolicyClientError>;

    /// Request deletion of a policy
    async fn delete(&self, policy_ref: &PolicyRef) -> Result<(), PolicyClientError>;

    /// List policies, optionally restricted to a namespace and a label selector
    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Policy>, PolicyClientError>;

    /// Fetch a policy, mapping `NotFound` to `None`
    async fn get_opt(&self, policy_ref: &PolicyRef) -> Result<Option<Policy>, PolicyClientError> {
        match self.get(policy_ref).await {
            Ok(policy) => Ok(Some(policy)),
            Err(PolicyClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a policy, treating `NotFound` as success
    async fn delete_if_present(&self, policy_ref: &PolicyRef) -> Result<(), PolicyClientError> {
        match self.delete(policy_ref).await {
            Ok(()) | Err(PolicyClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
