//! Finalizer bookkeeping on hub policies.
//!
//! Both operations are set-membership updates: other finalizers on the object
//! are preserved, and adding or removing twice is a no-op. A version conflict
//! re-reads the hub object and retries, up to [`MAX_ATTEMPTS`] writes.

use crds::{Policy, PolicyRef, SPEC_SYNC_FINALIZER, has_finalizer, is_deleting};
use kube::ResourceExt;
use policy_client::{PolicyClientError, PolicyClientTrait};
use tracing::debug;

pub const MAX_ATTEMPTS: u32 = 3;

fn policy_ref(policy: &Policy) -> Result<PolicyRef, PolicyClientError> {
    PolicyRef::from_policy(policy).ok_or_else(|| {
        PolicyClientError::InvalidRequest("policy is missing metadata.namespace or metadata.name".to_string())
    })
}

/// Adds the spec sync finalizer and returns the stored object.
///
/// Fails with `Conflict` if the object turns out to be deleting, since a
/// finalizer cannot be added once deletion has been requested.
pub async fn ensure_finalizer(
    hub: &dyn PolicyClientTrait,
    policy: &Policy,
) -> Result<Policy, PolicyClientError> {
    let target = policy_ref(policy)?;
    let mut current = policy.clone();

    for attempt in 1..=MAX_ATTEMPTS {
        if has_finalizer(&current) {
            return Ok(current);
        }
        if is_deleting(&current) {
            return Err(PolicyClientError::Conflict(format!(
                "policy {} is being deleted",
                target
            )));
        }

        let mut updated = current.clone();
        updated.finalizers_mut().push(SPEC_SYNC_FINALIZER.to_string());
        match hub.update(&updated).await {
            Ok(stored) => {
                debug!("Added finalizer to hub policy {}", target);
                return Ok(stored);
            }
            Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                debug!(
                    "Conflict adding finalizer to {} (attempt {}/{}), re-reading",
                    target, attempt, MAX_ATTEMPTS
                );
                current = hub.get(&target).await?;
            }
            Err(e) => return Err(e),
        }
    }

    Err(PolicyClientError::Conflict(format!(
        "gave up adding finalizer to {}",
        target
    )))
}

/// Removes the spec sync finalizer.
///
/// Returns `None` when the object is gone, either before the call or because
/// dropping the last finalizer let the API server delete it.
pub async fn remove_finalizer(
    hub: &dyn PolicyClientTrait,
    policy: &Policy,
) -> Result<Option<Policy>, PolicyClientError> {
    let target = policy_ref(policy)?;
    let mut current = policy.clone();

    for attempt in 1..=MAX_ATTEMPTS {
        if !has_finalizer(&current) {
            return Ok(Some(current));
        }

        let mut updated = current.clone();
        updated.finalizers_mut().retain(|f| f != SPEC_SYNC_FINALIZER);
        match hub.update(&updated).await {
            Ok(stored) => {
                debug!("Removed finalizer from hub policy {}", target);
                return Ok(Some(stored));
            }
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                debug!(
                    "Conflict removing finalizer from {} (attempt {}/{}), re-reading",
                    target, attempt, MAX_ATTEMPTS
                );
                match hub.get_opt(&target).await? {
                    Some(latest) => current = latest,
                    None => return Ok(None),
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(PolicyClientError::Conflict(format!(
        "gave up removing finalizer from {}",
        target
    )))
}
