//! Mock PolicyClient for unit testing
//!
//! In-memory implementation of `PolicyClientTrait` that follows the API server
//! contract closely enough to exercise the reconciler:
//! - every write bumps a monotonically increasing `resourceVersion`
//! - `update` rejects stale versions with `Conflict`
//! - `delete` of an object with finalizers only marks it for deletion; the
//!   object disappears once an update empties its finalizer list
//!
//! Two mocks can share one call log so tests can assert the ordering of calls
//! across the hub and the managed cluster.

mod helpers;

use crate::error::PolicyClientError;
use crate::policy_trait::PolicyClientTrait;
use crds::{Policy, PolicyRef};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Operation kinds recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Get,
    Create,
    Update,
    Delete,
    List,
}

impl MockOp {
    /// Whether the operation writes to the store
    pub fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// A recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub cluster: String,
    pub op: MockOp,
    pub policy_ref: Option<PolicyRef>,
    /// Finalizers carried by the object passed to `create`/`update`
    pub finalizers: Vec<String>,
}

/// Shared, ordered call log
pub type CallLog = Arc<Mutex<Vec<MockCall>>>;

/// Mock PolicyClient for testing
#[derive(Debug, Clone)]
pub struct MockPolicyClient {
    cluster_name: String,
    policies: Arc<Mutex<BTreeMap<PolicyRef, Policy>>>,
    next_resource_version: Arc<Mutex<u64>>,
    calls: CallLog,
    failures: Arc<Mutex<VecDeque<(MockOp, PolicyClientError)>>>,
}

impl MockPolicyClient {
    /// Create a new mock client with an empty store
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            policies: Arc::new(Mutex::new(BTreeMap::new())),
            next_resource_version: Arc::new(Mutex::new(1)),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Record calls into `log` instead of a private log
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.calls = log;
        self
    }

    /// The call log this mock writes to
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// Calls made against this cluster, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.cluster == self.cluster_name)
            .cloned()
            .collect()
    }

    /// Number of create/update/delete calls made against this cluster
    pub fn write_count(&self) -> usize {
        self.calls().iter().filter(|c| c.op.is_write()).count()
    }

    /// Forget every recorded call (shared log included)
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make the next `op` call fail with `error`
    pub fn fail_next(&self, op: MockOp, error: PolicyClientError) {
        self.fail_times(op, error, 1);
    }

    /// Make the next `times` calls of `op` fail with `error`
    pub fn fail_times(&self, op: MockOp, error: PolicyClientError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back((op, error.clone()));
        }
    }

    /// Seed an object directly (for test setup, not recorded)
    pub fn insert(&self, mut policy: Policy) -> Policy {
        let policy_ref = PolicyRef::from_policy(&policy).expect("seeded policy needs namespace and name");
        policy.metadata.resource_version = Some(self.bump_version());
        self.policies.lock().unwrap().insert(policy_ref, policy.clone());
        policy
    }

    /// Peek at the stored object (not recorded)
    pub fn policy(&self, policy_ref: &PolicyRef) -> Option<Policy> {
        self.policies.lock().unwrap().get(policy_ref).cloned()
    }

    /// Remove an object regardless of finalizers, like a namespace teardown
    /// racing the controller (not recorded)
    pub fn remove(&self, policy_ref: &PolicyRef) -> Option<Policy> {
        self.policies.lock().unwrap().remove(policy_ref)
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.policies.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump_version(&self) -> String {
        let mut next = self.next_resource_version.lock().unwrap();
        let current = *next;
        *next += 1;
        current.to_string()
    }

    fn record(&self, op: MockOp, policy_ref: Option<&PolicyRef>, policy: Option<&Policy>) {
        self.calls.lock().unwrap().push(MockCall {
            cluster: self.cluster_name.clone(),
            op,
            policy_ref: policy_ref.cloned(),
            finalizers: policy
                .and_then(|p| p.metadata.finalizers.clone())
                .unwrap_or_default(),
        });
    }

    fn injected_failure(&self, op: MockOp) -> Result<(), PolicyClientError> {
        let mut failures = self.failures.lock().unwrap();
        match failures.iter().position(|(o, _)| *o == op) {
            Some(index) => Err(failures.remove(index).map(|(_, e)| e).unwrap_or_else(|| {
                PolicyClientError::Unavailable("injected failure".to_string())
            })),
            None => Ok(()),
        }
    }

    fn target(policy: &Policy) -> Result<PolicyRef, PolicyClientError> {
        PolicyRef::from_policy(policy).ok_or_else(|| {
            PolicyClientError::InvalidRequest("policy is missing metadata.namespace or metadata.name".to_string())
        })
    }
}

#[async_trait::async_trait]
impl PolicyClientTrait for MockPolicyClient {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    async fn get(&self, policy_ref: &PolicyRef) -> Result<Policy, PolicyClientError> {
        self.record(MockOp::Get, Some(policy_ref), None);
        self.injected_failure(MockOp::Get)?;
        self.policy(policy_ref)
            .ok_or_else(|| PolicyClientError::NotFound(format!("policy {} not found", policy_ref)))
    }

    async fn create(&self, policy: &Policy) -> Result<Policy, PolicyClientError> {
        let target = Self::target(policy)?;
        self.record(MockOp::Create, Some(&target), Some(policy));
        self.injected_failure(MockOp::Create)?;

        let mut policies = self.policies.lock().unwrap();
        if policies.contains_key(&target) {
            return Err(PolicyClientError::Conflict(format!("policy {} already exists", target)));
        }
        let mut created = policy.clone();
        created.metadata.resource_version = Some(self.bump_version());
        created.metadata.deletion_timestamp = None;
        policies.insert(target, created.clone());
        Ok(created)
    }

    async fn update(&self, policy: &Policy) -> Result<Policy, PolicyClientError> {
        let target = Self::target(policy)?;
        self.record(MockOp::Update, Some(&target), Some(policy));
        self.injected_failure(MockOp::Update)?;

        let mut policies = self.policies.lock().unwrap();
        let stored = policies
            .get(&target)
            .ok_or_else(|| PolicyClientError::NotFound(format!("policy {} not found", target)))?;
        if policy.metadata.resource_version != stored.metadata.resource_version {
            return Err(PolicyClientError::Conflict(format!(
                "policy {} has been modified (have {:?}, stored {:?})",
                target, policy.metadata.resource_version, stored.metadata.resource_version
            )));
        }

        let mut updated = policy.clone();
        updated.metadata.resource_version = Some(self.bump_version());
        // deletionTimestamp is server-owned
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();

        let finalized = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty());
        if finalized {
            policies.remove(&target);
        } else {
            policies.insert(target, updated.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, policy_ref: &PolicyRef) -> Result<(), PolicyClientError> {
        self.record(MockOp::Delete, Some(policy_ref), None);
        self.injected_failure(MockOp::Delete)?;

        let mut policies = self.policies.lock().unwrap();
        let Some(stored) = policies.get_mut(policy_ref) else {
            return Err(PolicyClientError::NotFound(format!("policy {} not found", policy_ref)));
        };
        let has_finalizers = stored.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = helpers::deletion_timestamp();
                stored.metadata.resource_version = Some(self.bump_version());
            }
        } else {
            policies.remove(policy_ref);
        }
        Ok(())
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Policy>, PolicyClientError> {
        self.record(MockOp::List, None, None);
        self.injected_failure(MockOp::List)?;

        Ok(self
            .policies
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| namespace.is_none_or(|ns| r.namespace == ns))
            .filter(|(_, p)| label_selector.is_none_or(|s| helpers::matches_selector(p, s)))
            .map(|(_, p)| p.clone())
            .collect())
    }
}
