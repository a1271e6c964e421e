//! Test utilities for unit testing the reconciler
//!
//! Builders for policies and a reconciler wired to in-memory clusters that
//! share one call log.

use crate::events::RecordingEventRecorder;
use crate::health::HealthState;
use crate::reconciler::Reconciler;
use crds::{Policy, PolicyRef, PolicySpec};
use kube::ResourceExt;
use policy_client::{CallLog, MockCall, MockPolicyClient};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Helper to create a policy with `spec`
pub fn policy(namespace: &str, name: &str, spec: Value) -> Policy {
    let mut policy = Policy::new(name, PolicySpec::from_value(spec));
    policy.metadata.namespace = Some(namespace.to_string());
    policy
}

pub fn with_finalizers(mut policy: Policy, finalizers: &[&str]) -> Policy {
    policy
        .finalizers_mut()
        .extend(finalizers.iter().map(|f| f.to_string()));
    policy
}

/// Marks the policy as deletion-requested
pub fn deleting(mut policy: Policy) -> Policy {
    policy.metadata.deletion_timestamp =
        serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
    policy
}

/// Reconciler over two mock clusters
pub struct TestEnv {
    pub hub: Arc<MockPolicyClient>,
    pub managed: Arc<MockPolicyClient>,
    pub recorder: Arc<RecordingEventRecorder>,
    pub health: Arc<HealthState>,
    pub reconciler: Reconciler,
    log: CallLog,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_threshold(5)
    }

    pub fn with_threshold(degraded_threshold: u32) -> Self {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let hub = Arc::new(MockPolicyClient::new("hub").with_call_log(log.clone()));
        let managed = Arc::new(MockPolicyClient::new("managed").with_call_log(log.clone()));
        let recorder = Arc::new(RecordingEventRecorder::new());
        let health = Arc::new(HealthState::new(degraded_threshold));
        let reconciler = Reconciler::new(
            hub.clone(),
            managed.clone(),
            recorder.clone(),
            health.clone(),
            BACKOFF_BASE,
            BACKOFF_MAX,
        );
        Self {
            hub,
            managed,
            recorder,
            health,
            reconciler,
            log,
        }
    }

    /// Every call made against either cluster, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
        self.recorder.clear();
    }

    pub fn hub_policy(&self, policy_ref: &PolicyRef) -> Option<Policy> {
        self.hub.policy(policy_ref)
    }

    pub fn managed_policy(&self, policy_ref: &PolicyRef) -> Option<Policy> {
        self.managed.policy(policy_ref)
    }
}
