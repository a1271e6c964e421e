//! Kubernetes-backed Policy client
//!
//! Thin wrapper over `kube::Api<Policy>` that maps every API failure into a
//! classified [`PolicyClientError`].

use crate::error::PolicyClientError;
use crate::policy_trait::PolicyClientTrait;
use crds::{Policy, PolicyRef};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::fmt;
use tracing::debug;

/// Policy client for one cluster
#[derive(Clone)]
pub struct KubePolicyClient {
    client: Client,
    cluster_name: String,
}

impl fmt::Debug for KubePolicyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubePolicyClient")
            .field("cluster_name", &self.cluster_name)
            .finish_non_exhaustive()
    }
}

impl KubePolicyClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `client` - Kubernetes client already configured for the target cluster
    /// * `cluster_name` - Name used in logs and events (e.g., "hub")
    pub fn new(client: Client, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
        }
    }

    fn namespaced(&self, namespace: &str) -> Api<Policy> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Resolves the reference an object will be written to
    fn target(policy: &Policy) -> Result<PolicyRef, PolicyClientError> {
        PolicyRef::from_policy(policy).ok_or_else(|| {
            PolicyClientError::InvalidRequest("policy is missing metadata.namespace or metadata.name".to_string())
        })
    }
}

#[async_trait::async_trait]
impl PolicyClientTrait for KubePolicyClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn get(&self, policy_ref: &PolicyRef) -> Result<Policy, PolicyClientError> {
        debug!("[{}] GET policy {}", self.cluster_name, policy_ref);
        Ok(self.namespaced(&policy_ref.namespace).get(&policy_ref.name).await?)
    }

    async fn create(&self, policy: &Policy) -> Result<Policy, PolicyClientError> {
        let target = Self::target(policy)?;
        debug!("[{}] CREATE policy {}", self.cluster_name, target);
        Ok(self
            .namespaced(&target.namespace)
            .create(&PostParams::default(), policy)
            .await?)
    }

    async fn update(&self, policy: &Policy) -> Result<Policy, PolicyClientError> {
        let target = Self::target(policy)?;
        if policy.metadata.resource_version.is_none() {
            // A replace without resourceVersion would be an unconditional overwrite
            return Err(PolicyClientError::InvalidRequest(format!(
                "update of {} requires metadata.resourceVersion",
                target
            )));
        }
        debug!(
            "[{}] UPDATE policy {} at resourceVersion {:?}",
            self.cluster_name, target, policy.metadata.resource_version
        );
        Ok(self
            .namespaced(&target.namespace)
            .replace(&target.name, &PostParams::default(), policy)
            .await?)
    }

    async fn delete(&self, policy_ref: &PolicyRef) -> Result<(), PolicyClientError> {
        debug!("[{}] DELETE policy {}", self.cluster_name, policy_ref);
        self.namespaced(&policy_ref.namespace)
            .delete(&policy_ref.name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Policy>, PolicyClientError> {
        let api: Api<Policy> = match namespace {
            Some(ns) => self.namespaced(ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        debug!(
            "[{}] LIST policies in {} (selector: {:?})",
            self.cluster_name,
            namespace.unwrap_or("all namespaces"),
            label_selector
        );
        Ok(api.list(&params).await?.items)
    }
}
