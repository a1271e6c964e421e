//! Kubernetes events emitted on the managed cluster.

use crds::PolicyRef;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
#[cfg(test)]
use std::sync::Mutex;
use tracing::debug;

/// Name reported as the event source
pub const REPORTER: &str = "policy-spec-sync";

pub const REASON_SPEC_SYNC: &str = "PolicySpecSync";
pub const REASON_POLICY_DELETED: &str = "PolicyDeleted";
pub const REASON_ORPHAN_REMOVED: &str = "OrphanRemoved";
pub const REASON_FINALIZER_REMOVED: &str = "FinalizerRemoved";
pub const REASON_SYNC_RETRYING: &str = "SyncRetrying";
pub const REASON_SYNC_FAILED: &str = "SyncFailed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

/// Sink for reconcile events.
///
/// Recording never fails from the caller's point of view: events are
/// informational and must not influence reconcile results.
pub trait EventRecorder: Send + Sync {
    fn record(&self, policy: &PolicyRef, kind: EventKind, reason: &str, message: &str);
}

/// Publishes events against the Policy on the managed cluster
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    fn object_reference(policy: &PolicyRef) -> ObjectReference {
        ObjectReference {
            api_version: Some(format!("{}/v1", crds::POLICY_API_GROUP)),
            kind: Some("Policy".to_string()),
            namespace: Some(policy.namespace.clone()),
            name: Some(policy.name.clone()),
            ..Default::default()
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn record(&self, policy: &PolicyRef, kind: EventKind, reason: &str, message: &str) {
        let recorder = self.recorder.clone();
        let reference = Self::object_reference(policy);
        let event = Event {
            type_: kind.into(),
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        let policy = policy.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(&event, &reference).await {
                debug!("Failed to publish event {} for {}: {}", event.reason, policy, e);
            }
        });
    }
}

/// A recorded event, as kept by [`RecordingEventRecorder`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub policy: PolicyRef,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

/// Keeps events in memory so tests can assert on them
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

#[cfg(test)]
impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[cfg(test)]
impl EventRecorder for RecordingEventRecorder {
    fn record(&self, policy: &PolicyRef, kind: EventKind, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                policy: policy.clone(),
                kind,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }
}
