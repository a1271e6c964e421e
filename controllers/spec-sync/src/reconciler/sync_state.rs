//! Relationship between the hub object and its managed mirror.

use crds::{Policy, is_deleting};
use std::fmt;

/// Derived per reconcile from fresh reads of both clusters; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Neither cluster has the object
    AbsentAbsent,
    /// Hub object exists, mirror does not
    HubOnly,
    /// Mirror exists without a hub object (orphan)
    ManagedOnly,
    BothInSync,
    BothOutOfSync,
    /// Hub deletion requested
    HubDeleting,
}

impl SyncState {
    pub fn derive(hub: Option<&Policy>, managed: Option<&Policy>) -> Self {
        match (hub, managed) {
            (Some(hub), _) if is_deleting(hub) => SyncState::HubDeleting,
            (None, None) => SyncState::AbsentAbsent,
            (Some(_), None) => SyncState::HubOnly,
            (None, Some(_)) => SyncState::ManagedOnly,
            (Some(hub), Some(managed)) => {
                if hub.spec == managed.spec {
                    SyncState::BothInSync
                } else {
                    SyncState::BothOutOfSync
                }
            }
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::AbsentAbsent => "absent-absent",
            SyncState::HubOnly => "hub-only",
            SyncState::ManagedOnly => "managed-only",
            SyncState::BothInSync => "both-in-sync",
            SyncState::BothOutOfSync => "both-out-of-sync",
            SyncState::HubDeleting => "hub-deleting",
        };
        f.write_str(s)
    }
}
