//! Reconciliation of hub policies onto the managed cluster.
//!
//! `reconcile` is called with a `namespace/name` key and re-reads both
//! clusters on every pass. It never trusts watch payloads and never panics;
//! every client error is classified here and turned into a
//! [`ReconcileOutcome`].

pub mod finalizer;
pub mod sync_state;

#[cfg(test)]
mod reconciler_test;

pub use sync_state::SyncState;

use crate::backoff::ExponentialBackoff;
use crate::error::{Cluster, ControllerError};
use crate::events::{
    EventKind, EventRecorder, REASON_FINALIZER_REMOVED, REASON_ORPHAN_REMOVED,
    REASON_POLICY_DELETED, REASON_SPEC_SYNC, REASON_SYNC_FAILED, REASON_SYNC_RETRYING,
};
use crate::health::HealthState;
use crds::{Policy, PolicyRef, has_finalizer, is_deleting, is_mirror, mark_as_mirror, mirror_source};
use kube::ResourceExt;
use policy_client::{ErrorClass, PolicyClientTrait};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Passes run back to back when a write hits a version conflict
const MAX_CONFLICT_PASSES: u32 = 3;

/// Emit a retry warning event on the first failure and then every Nth
const RETRY_EVENT_INTERVAL: u32 = 5;

/// Result of a single reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    RequeueAfter(Duration),
    /// Not retried until the key is enqueued again
    Fatal(String),
}

impl ReconcileOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Done => "done",
            ReconcileOutcome::RequeueAfter(_) => "requeue",
            ReconcileOutcome::Fatal(_) => "fatal",
        }
    }
}

/// How a pass that hit no error ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Done,
    /// Waiting for a terminating managed object to disappear
    WaitForMirror,
}

/// Backoff state for a policy key
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base, max),
            error_count: 0,
        }
    }
}

/// Drives managed-cluster policies toward their hub counterparts.
pub struct Reconciler {
    hub: Arc<dyn PolicyClientTrait>,
    managed: Arc<dyn PolicyClientTrait>,
    recorder: Arc<dyn EventRecorder>,
    health: Arc<HealthState>,
    backoff_base: Duration,
    backoff_max: Duration,
    /// Error tracking per key; entries are dropped on success
    backoff_states: Mutex<HashMap<PolicyRef, BackoffState>>,
}

impl Reconciler {
    pub fn new(
        hub: Arc<dyn PolicyClientTrait>,
        managed: Arc<dyn PolicyClientTrait>,
        recorder: Arc<dyn EventRecorder>,
        health: Arc<HealthState>,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self {
            hub,
            managed,
            recorder,
            health,
            backoff_base,
            backoff_max,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile one policy key
    pub async fn reconcile(&self, policy_ref: &PolicyRef) -> ReconcileOutcome {
        let mut pass = 1;
        let result = loop {
            match self.sync(policy_ref).await {
                Err(e) if e.is_conflict() && pass < MAX_CONFLICT_PASSES => {
                    debug!("Conflict reconciling {} (pass {}), re-reading: {}", policy_ref, pass, e);
                    pass += 1;
                }
                result => break result,
            }
        };

        match result {
            Ok(Step::Done) => {
                self.health.record_success(Cluster::Hub);
                self.health.record_success(Cluster::Managed);
                self.reset_backoff(policy_ref);
                ReconcileOutcome::Done
            }
            Ok(Step::WaitForMirror) => {
                self.health.record_success(Cluster::Hub);
                self.health.record_success(Cluster::Managed);
                let (delay, _) = self.next_backoff(policy_ref);
                debug!("Managed policy {} is terminating, requeueing in {:?}", policy_ref, delay);
                ReconcileOutcome::RequeueAfter(delay)
            }
            Err(e) => self.handle_error(policy_ref, e),
        }
    }

    fn handle_error(&self, policy_ref: &PolicyRef, err: ControllerError) -> ReconcileOutcome {
        let class = err.class();
        match err.cluster() {
            Some(Cluster::Hub) => self.health.record_failure(Cluster::Hub, class),
            Some(Cluster::Managed) => {
                // The hub read that starts every pass succeeded
                self.health.record_success(Cluster::Hub);
                self.health.record_failure(Cluster::Managed, class);
            }
            None => {}
        }

        match class {
            // A not-found surfacing here means the object vanished between the
            // read and the write; the next pass sees the new state.
            ErrorClass::NotFound | ErrorClass::Transient => {
                let (delay, error_count) = self.next_backoff(policy_ref);
                warn!(
                    "Failed to reconcile policy {} (attempt {}): {}; retrying in {:?}",
                    policy_ref, error_count, err, delay
                );
                if error_count == 1 || error_count % RETRY_EVENT_INTERVAL == 0 {
                    self.recorder.record(
                        policy_ref,
                        EventKind::Warning,
                        REASON_SYNC_RETRYING,
                        &format!("Sync failed ({} attempts), retrying: {}", error_count, err),
                    );
                }
                ReconcileOutcome::RequeueAfter(delay)
            }
            ErrorClass::Fatal => {
                error!("Giving up on policy {}: {}", policy_ref, err);
                self.reset_backoff(policy_ref);
                self.recorder.record(
                    policy_ref,
                    EventKind::Warning,
                    REASON_SYNC_FAILED,
                    &err.to_string(),
                );
                ReconcileOutcome::Fatal(err.to_string())
            }
        }
    }

    /// One pass over the key. Reads both clusters fresh.
    async fn sync(&self, policy_ref: &PolicyRef) -> Result<Step, ControllerError> {
        let hub = self
            .hub
            .get_opt(policy_ref)
            .await
            .map_err(ControllerError::hub)?;

        match hub {
            Some(hub) if is_deleting(&hub) => self.cleanup(policy_ref, hub).await,
            Some(hub) => self.apply(policy_ref, hub).await,
            None => self.remove_orphan(policy_ref).await,
        }
    }

    /// Hub policy is live: make sure it holds our finalizer, then create or
    /// overwrite the mirror.
    async fn apply(&self, policy_ref: &PolicyRef, hub: Policy) -> Result<Step, ControllerError> {
        // The finalizer must be stored before a mirror can exist
        let hub = finalizer::ensure_finalizer(self.hub.as_ref(), &hub)
            .await
            .map_err(ControllerError::hub)?;

        let managed = self
            .managed
            .get_opt(policy_ref)
            .await
            .map_err(ControllerError::managed)?;
        let state = SyncState::derive(Some(&hub), managed.as_ref());
        debug!("Policy {} is {}", policy_ref, state);

        match managed {
            None => {
                let mirror = build_mirror(policy_ref, &hub);
                self.managed
                    .create(&mirror)
                    .await
                    .map_err(ControllerError::managed)?;
                info!("Created policy {} on managed cluster", policy_ref);
                self.recorder.record(
                    policy_ref,
                    EventKind::Normal,
                    REASON_SPEC_SYNC,
                    "Policy spec created from hub",
                );
                Ok(Step::Done)
            }
            Some(managed) if is_deleting(&managed) => Ok(Step::WaitForMirror),
            Some(managed) if state == SyncState::BothInSync && is_marked_for(&managed, policy_ref) => {
                Ok(Step::Done)
            }
            Some(mut managed) => {
                managed.spec = hub.spec.clone();
                mark_as_mirror(&mut managed, policy_ref);
                self.managed
                    .update(&managed)
                    .await
                    .map_err(ControllerError::managed)?;
                if state == SyncState::BothInSync {
                    // Spec already matched; only the mirror markers were written
                    info!("Marked policy {} on managed cluster as mirror", policy_ref);
                } else {
                    info!("Updated spec of policy {} on managed cluster", policy_ref);
                    self.recorder.record(
                        policy_ref,
                        EventKind::Normal,
                        REASON_SPEC_SYNC,
                        "Policy spec updated from hub",
                    );
                }
                Ok(Step::Done)
            }
        }
    }

    /// Hub deletion requested: remove the mirror, and only once it is gone
    /// release the hub object.
    async fn cleanup(&self, policy_ref: &PolicyRef, hub: Policy) -> Result<Step, ControllerError> {
        let managed = self
            .managed
            .get_opt(policy_ref)
            .await
            .map_err(ControllerError::managed)?;

        if let Some(managed) = managed {
            if !is_deleting(&managed) {
                self.managed
                    .delete_if_present(policy_ref)
                    .await
                    .map_err(ControllerError::managed)?;
                info!("Deleted policy {} from managed cluster (hub policy deleted)", policy_ref);
                self.recorder.record(
                    policy_ref,
                    EventKind::Normal,
                    REASON_POLICY_DELETED,
                    "Hub policy deleted, removed managed copy",
                );
            }

            let remaining = self
                .managed
                .get_opt(policy_ref)
                .await
                .map_err(ControllerError::managed)?;
            if remaining.is_some() {
                return Ok(Step::WaitForMirror);
            }
        }

        if has_finalizer(&hub) {
            finalizer::remove_finalizer(self.hub.as_ref(), &hub)
                .await
                .map_err(ControllerError::hub)?;
            info!("Removed finalizer from hub policy {}", policy_ref);
            self.recorder.record(
                policy_ref,
                EventKind::Normal,
                REASON_FINALIZER_REMOVED,
                "Managed copy removed, hub deletion unblocked",
            );
        } else {
            debug!("Hub policy {} is deleting without our finalizer", policy_ref);
        }
        Ok(Step::Done)
    }

    /// No hub policy at this key: anything on the managed side is an orphan.
    async fn remove_orphan(&self, policy_ref: &PolicyRef) -> Result<Step, ControllerError> {
        let managed = self
            .managed
            .get_opt(policy_ref)
            .await
            .map_err(ControllerError::managed)?;

        match managed {
            None => Ok(Step::Done),
            Some(managed) if is_deleting(&managed) => {
                debug!("Orphaned policy {} is already terminating", policy_ref);
                Ok(Step::Done)
            }
            Some(_) => {
                self.managed
                    .delete_if_present(policy_ref)
                    .await
                    .map_err(ControllerError::managed)?;
                info!("Deleted orphaned policy {} from managed cluster", policy_ref);
                self.recorder.record(
                    policy_ref,
                    EventKind::Normal,
                    REASON_ORPHAN_REMOVED,
                    "Hub policy no longer exists, removed managed copy",
                );
                Ok(Step::Done)
            }
        }
    }

    /// Advance the key's backoff; returns the delay and the failure count
    fn next_backoff(&self, policy_ref: &PolicyRef) -> (Duration, u32) {
        let Ok(mut states) = self.backoff_states.lock() else {
            return (self.backoff_base, 1);
        };
        let state = states
            .entry(policy_ref.clone())
            .or_insert_with(|| BackoffState::new(self.backoff_base, self.backoff_max));
        state.error_count += 1;
        (state.backoff.next_backoff(), state.error_count)
    }

    fn reset_backoff(&self, policy_ref: &PolicyRef) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(policy_ref);
        }
    }

    /// Consecutive failures recorded for the key
    #[cfg(test)]
    pub fn error_count(&self, policy_ref: &PolicyRef) -> u32 {
        self.backoff_states
            .lock()
            .ok()
            .and_then(|states| states.get(policy_ref).map(|s| s.error_count))
            .unwrap_or(0)
    }
}

/// Carries the mirror label and points back at `policy_ref`
fn is_marked_for(managed: &Policy, policy_ref: &PolicyRef) -> bool {
    is_mirror(managed) && mirror_source(managed).as_ref() == Some(policy_ref)
}

/// Managed copy of a hub policy. Labels and annotations are copied once at
/// creation; afterwards only the spec is kept in sync.
pub(crate) fn build_mirror(policy_ref: &PolicyRef, hub: &Policy) -> Policy {
    let mut mirror = Policy::new(&policy_ref.name, hub.spec.clone());
    mirror.metadata.namespace = Some(policy_ref.namespace.clone());
    mirror.metadata.labels = hub.metadata.labels.clone();
    mirror.metadata.annotations = hub.metadata.annotations.clone();
    mirror
        .annotations_mut()
        .remove("kubectl.kubernetes.io/last-applied-configuration");
    mark_as_mirror(&mut mirror, policy_ref);
    mirror
}
