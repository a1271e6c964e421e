//! Helper functions shared by the mock store

use crds::Policy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

/// Timestamp stamped on objects whose deletion was requested
pub(crate) fn deletion_timestamp() -> Option<Time> {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).ok()
}

/// Equality-based label selector matching (`k=v,k2=v2`, or bare `k` for presence)
pub(crate) fn matches_selector(policy: &Policy, selector: &str) -> bool {
    let labels = policy.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}
