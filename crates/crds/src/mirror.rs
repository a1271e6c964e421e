//! Ownership markers
//!
//! Label, annotation and finalizer identifiers stamped by the spec sync
//! controller. These strings are part of the on-cluster contract and must not
//! change between releases.

use kube::ResourceExt;

use crate::{Policy, PolicyRef};

/// Label set on every managed-cluster mirror (selector friendly)
pub const MIRROR_LABEL: &str = "policy.open-cluster-management.io/spec-sync-mirror";

/// Value of [`MIRROR_LABEL`]
pub const MIRROR_LABEL_VALUE: &str = "true";

/// Annotation recording the hub `namespace/name` a mirror was created from
pub const MIRROR_SOURCE_ANNOTATION: &str = "policy.open-cluster-management.io/spec-sync-source";

/// Finalizer held on hub policies while a managed mirror may exist
pub const SPEC_SYNC_FINALIZER: &str = "policy.open-cluster-management.io/spec-sync-cleanup";

/// Whether the spec sync finalizer is present
pub fn has_finalizer(policy: &Policy) -> bool {
    policy.finalizers().iter().any(|f| f == SPEC_SYNC_FINALIZER)
}

/// Whether deletion has been requested for the object
pub fn is_deleting(policy: &Policy) -> bool {
    policy.metadata.deletion_timestamp.is_some()
}

/// Whether the object carries the mirror label
pub fn is_mirror(policy: &Policy) -> bool {
    policy.labels().get(MIRROR_LABEL).map(String::as_str) == Some(MIRROR_LABEL_VALUE)
}

/// Hub reference recorded on a mirror, if present and well formed
pub fn mirror_source(policy: &Policy) -> Option<PolicyRef> {
    policy
        .annotations()
        .get(MIRROR_SOURCE_ANNOTATION)
        .and_then(|value| value.parse().ok())
}

/// Stamps the mirror label and source annotation onto `policy`
pub fn mark_as_mirror(policy: &mut Policy, source: &PolicyRef) {
    policy
        .labels_mut()
        .insert(MIRROR_LABEL.to_string(), MIRROR_LABEL_VALUE.to_string());
    policy
        .annotations_mut()
        .insert(MIRROR_SOURCE_ANNOTATION.to_string(), source.to_string());
}
