//! Reconciler tests against two in-memory clusters.

use super::*;
use crate::events::EventKind;
use crate::test_utils::{BACKOFF_BASE, TestEnv, deleting, policy, with_finalizers};
use crds::{PolicySpec, SPEC_SYNC_FINALIZER, is_mirror, mirror_source};
use policy_client::{MockOp, PolicyClientError};
use serde_json::json;

fn p1() -> PolicyRef {
    PolicyRef::new("ns1", "P1")
}

fn within_jitter(delay: Duration, expected: Duration) -> bool {
    delay >= expected && delay <= expected.mul_f64(1.1)
}

/// Hub policy P1 in ns1, reconciled once so both sides match
async fn converged_env() -> TestEnv {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"remediationAction": "inform"})));
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    env.clear_calls();
    env
}

#[tokio::test]
async fn test_spec_follows_hub_through_lifecycle() {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"remediationAction": "inform"})));

    // Create
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).expect("mirror created");
    assert_eq!(managed.spec.get("remediationAction"), Some(&json!("inform")));
    assert!(is_mirror(&managed));
    assert_eq!(mirror_source(&managed), Some(p1()));
    assert!(has_finalizer(&env.hub_policy(&p1()).unwrap()));

    // Update a single field
    let mut hub = env.hub_policy(&p1()).unwrap();
    hub.spec = PolicySpec::from_value(json!({"remediationAction": "enforce"}));
    env.hub.update(&hub).await.unwrap();
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).unwrap();
    assert_eq!(managed.spec.get("remediationAction"), Some(&json!("enforce")));

    // Replace with a different shape: full overwrite, no merge
    let new_shape = json!({
        "disabled": false,
        "policy-templates": [{
            "objectDefinition": {
                "apiVersion": "policies.open-cluster-management.io/v1",
                "kind": "ConfigurationPolicy",
                "metadata": {"name": "case1-test-policy-trustedcontainerpolicy"},
                "spec": {"severity": "low", "namespaceSelector": {"include": ["default"]}}
            }
        }]
    });
    let mut hub = env.hub_policy(&p1()).unwrap();
    hub.spec = PolicySpec::from_value(new_shape.clone());
    env.hub.update(&hub).await.unwrap();
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).unwrap();
    assert_eq!(managed.spec.to_value(), new_shape);
    assert!(managed.spec.get("remediationAction").is_none());

    // Delete: mirror goes, then the finalizer, then the hub object
    env.hub.delete(&p1()).await.unwrap();
    assert!(env.hub_policy(&p1()).is_some(), "finalizer holds the hub object");
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(env.managed_policy(&p1()).is_none());
    assert!(env.hub_policy(&p1()).is_none());
}

#[tokio::test]
async fn test_second_reconcile_makes_no_writes() {
    let env = converged_env().await;

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert_eq!(env.hub.write_count(), 0);
    assert_eq!(env.managed.write_count(), 0);
    assert!(env.recorder.events().is_empty());
}

#[tokio::test]
async fn test_unlabeled_policy_with_matching_spec_marked_as_mirror() {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"a": 1})));
    env.managed.insert(policy("ns1", "P1", json!({"a": 1})));

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).unwrap();
    assert!(is_mirror(&managed));
    assert_eq!(mirror_source(&managed), Some(p1()));
    assert_eq!(managed.spec.get("a"), Some(&json!(1)));
    assert!(!env.recorder.reasons().contains(&REASON_SPEC_SYNC.to_string()));

    env.clear_calls();
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert_eq!(env.hub.write_count() + env.managed.write_count(), 0);
}

#[tokio::test]
async fn test_mirror_of_other_source_restamped() {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"a": 1})));
    let mut stale = policy("ns1", "P1", json!({"a": 1}));
    mark_as_mirror(&mut stale, &PolicyRef::new("ns9", "P9"));
    env.managed.insert(stale);

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert_eq!(mirror_source(&env.managed_policy(&p1()).unwrap()), Some(p1()));
}

#[tokio::test]
async fn test_finalizer_added_before_mirror_created() {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"a": 1})));
    env.reconciler.reconcile(&p1()).await;

    let writes: Vec<(String, MockOp)> = env
        .calls()
        .into_iter()
        .filter(|c| c.op.is_write())
        .map(|c| (c.cluster, c.op))
        .collect();
    assert_eq!(
        writes,
        vec![
            ("hub".to_string(), MockOp::Update),
            ("managed".to_string(), MockOp::Create),
        ]
    );
}

#[tokio::test]
async fn test_mirror_deleted_before_finalizer_removed() {
    let env = converged_env().await;
    env.hub.delete(&p1()).await.unwrap();
    env.clear_calls();

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);

    let writes: Vec<(String, MockOp)> = env
        .calls()
        .into_iter()
        .filter(|c| c.op.is_write())
        .map(|c| (c.cluster, c.op))
        .collect();
    assert_eq!(
        writes,
        vec![
            ("managed".to_string(), MockOp::Delete),
            ("hub".to_string(), MockOp::Update),
        ]
    );
    assert_eq!(
        env.recorder.reasons(),
        vec![REASON_POLICY_DELETED.to_string(), REASON_FINALIZER_REMOVED.to_string()]
    );
}

#[tokio::test]
async fn test_finalizer_kept_while_mirror_terminating() {
    let env = TestEnv::new();
    env.hub.insert(deleting(with_finalizers(
        policy("ns1", "P1", json!({"a": 1})),
        &[SPEC_SYNC_FINALIZER],
    )));
    env.managed.insert(with_finalizers(
        build_mirror(&p1(), &policy("ns1", "P1", json!({"a": 1}))),
        &["example.com/hold"],
    ));

    let outcome = env.reconciler.reconcile(&p1()).await;
    assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(d) if within_jitter(d, BACKOFF_BASE)));
    assert!(has_finalizer(&env.hub_policy(&p1()).unwrap()));
    assert!(is_deleting(&env.managed_policy(&p1()).unwrap()));
    assert_eq!(env.hub.write_count(), 0);

    // The managed-side finalizer goes away
    env.managed.remove(&p1());
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(env.hub_policy(&p1()).is_none());
}

#[tokio::test]
async fn test_finalizer_kept_while_managed_unreachable() {
    let env = converged_env().await;
    env.hub.delete(&p1()).await.unwrap();
    env.managed.fail_times(
        MockOp::Delete,
        PolicyClientError::Unavailable("connection refused".into()),
        2,
    );

    for _ in 0..2 {
        let outcome = env.reconciler.reconcile(&p1()).await;
        assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
        assert!(has_finalizer(&env.hub_policy(&p1()).unwrap()));
        assert!(env.managed_policy(&p1()).is_some());
    }

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(env.managed_policy(&p1()).is_none());
    assert!(env.hub_policy(&p1()).is_none());
}

#[tokio::test]
async fn test_orphan_removed() {
    let env = TestEnv::new();
    env.managed
        .insert(build_mirror(&p1(), &policy("ns1", "P1", json!({"a": 1}))));

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(env.managed_policy(&p1()).is_none());
    assert_eq!(env.hub.write_count(), 0);
    assert_eq!(env.recorder.reasons(), vec![REASON_ORPHAN_REMOVED.to_string()]);
}

#[tokio::test]
async fn test_unlabeled_policy_without_hub_source_removed() {
    let env = TestEnv::new();
    env.managed.insert(policy("ns1", "P1", json!({"a": 1})));

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(env.managed.is_empty());
}

#[tokio::test]
async fn test_nothing_to_do_when_absent_on_both() {
    let env = TestEnv::new();
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert_eq!(env.hub.write_count() + env.managed.write_count(), 0);
}

#[tokio::test]
async fn test_mirror_recreated_after_external_delete() {
    let env = converged_env().await;

    // Namespace teardown on the managed cluster
    env.managed.remove(&p1());

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).expect("mirror recreated");
    assert_eq!(managed.spec, env.hub_policy(&p1()).unwrap().spec);
}

#[tokio::test]
async fn test_terminating_mirror_not_updated() {
    let env = converged_env().await;
    let mirror = env.managed.remove(&p1()).unwrap();
    env.managed
        .insert(deleting(with_finalizers(mirror, &["kubernetes"])));

    let mut hub = env.hub_policy(&p1()).unwrap();
    hub.spec = PolicySpec::from_value(json!({"remediationAction": "enforce"}));
    env.hub.update(&hub).await.unwrap();
    env.clear_calls();

    let outcome = env.reconciler.reconcile(&p1()).await;
    assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
    assert_eq!(env.managed.write_count(), 0);

    env.managed.remove(&p1());
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).unwrap();
    assert_eq!(managed.spec.get("remediationAction"), Some(&json!("enforce")));
}

#[tokio::test]
async fn test_transient_error_requeues_with_growing_backoff() {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"a": 1})));
    env.managed.fail_times(
        MockOp::Get,
        PolicyClientError::Unavailable("connection refused".into()),
        3,
    );

    let mut delays = Vec::new();
    for _ in 0..3 {
        match env.reconciler.reconcile(&p1()).await {
            ReconcileOutcome::RequeueAfter(d) => delays.push(d),
            other => panic!("expected requeue, got {:?}", other),
        }
    }
    assert!(within_jitter(delays[0], BACKOFF_BASE));
    assert!(within_jitter(delays[1], BACKOFF_BASE * 2));
    assert!(within_jitter(delays[2], BACKOFF_BASE * 4));
    assert_eq!(env.reconciler.error_count(&p1()), 3);

    // Finalizer went on before the managed side was touched
    assert!(has_finalizer(&env.hub_policy(&p1()).unwrap()));

    // Retry event on the first failure only (until the 5th)
    let retrying: Vec<_> = env
        .recorder
        .events()
        .into_iter()
        .filter(|e| e.reason == REASON_SYNC_RETRYING)
        .collect();
    assert_eq!(retrying.len(), 1);
    assert_eq!(retrying[0].kind, EventKind::Warning);

    // Connectivity returns
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert_eq!(env.reconciler.error_count(&p1()), 0);
    assert!(env.managed_policy(&p1()).is_some());
}

#[tokio::test]
async fn test_hub_unreachable_requeues() {
    let env = TestEnv::new();
    env.hub
        .fail_next(MockOp::Get, PolicyClientError::Unavailable("timeout".into()));

    let outcome = env.reconciler.reconcile(&p1()).await;
    assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
    assert_eq!(env.managed.calls().len(), 0);
}

#[tokio::test]
async fn test_fatal_error_reported_and_not_requeued() {
    let env = TestEnv::new();
    env.hub.insert(policy("ns1", "P1", json!({"a": 1})));
    env.managed.fail_next(
        MockOp::Create,
        PolicyClientError::Forbidden("policies is forbidden".into()),
    );

    match env.reconciler.reconcile(&p1()).await {
        ReconcileOutcome::Fatal(message) => assert!(message.contains("forbidden")),
        other => panic!("expected fatal, got {:?}", other),
    }
    assert!(env.health.is_degraded());
    assert!(env.health.is_cluster_degraded(Cluster::Managed));
    let events = env.recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, REASON_SYNC_FAILED);
    assert_eq!(events[0].kind, EventKind::Warning);

    // Next trigger succeeds and clears the degraded signal
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(!env.health.is_degraded());
}

#[tokio::test]
async fn test_failure_streak_degrades_health() {
    let env = TestEnv::with_threshold(3);
    env.hub.insert(policy("ns1", "P1", json!({"a": 1})));
    env.managed.fail_times(
        MockOp::Get,
        PolicyClientError::Unavailable("connection refused".into()),
        3,
    );

    for _ in 0..2 {
        env.reconciler.reconcile(&p1()).await;
    }
    assert!(!env.health.is_degraded());
    env.reconciler.reconcile(&p1()).await;
    assert!(env.health.is_cluster_degraded(Cluster::Managed));
    assert!(!env.health.is_cluster_degraded(Cluster::Hub));

    env.reconciler.reconcile(&p1()).await;
    assert!(!env.health.is_degraded());
}

#[tokio::test]
async fn test_conflict_reruns_whole_reconcile() {
    let env = converged_env().await;
    let mut hub = env.hub_policy(&p1()).unwrap();
    hub.spec = PolicySpec::from_value(json!({"remediationAction": "enforce"}));
    env.hub.update(&hub).await.unwrap();
    env.managed
        .fail_next(MockOp::Update, PolicyClientError::Conflict("stale".into()));
    env.clear_calls();

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let managed = env.managed_policy(&p1()).unwrap();
    assert_eq!(managed.spec.get("remediationAction"), Some(&json!("enforce")));

    // Both sides were read again before the second write
    let hub_gets = env
        .hub
        .calls()
        .iter()
        .filter(|c| c.op == MockOp::Get)
        .count();
    assert_eq!(hub_gets, 2);
    assert!(env.recorder.reasons().iter().all(|r| r != REASON_SYNC_RETRYING));
}

#[tokio::test]
async fn test_persistent_conflict_falls_back_to_requeue() {
    let env = converged_env().await;
    let mut hub = env.hub_policy(&p1()).unwrap();
    hub.spec = PolicySpec::from_value(json!({"b": 2}));
    env.hub.update(&hub).await.unwrap();
    env.managed.fail_times(
        MockOp::Update,
        PolicyClientError::Conflict("stale".into()),
        MAX_CONFLICT_PASSES as usize,
    );

    let outcome = env.reconciler.reconcile(&p1()).await;
    assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
}

#[tokio::test]
async fn test_other_finalizers_preserved() {
    let env = TestEnv::new();
    env.hub.insert(with_finalizers(
        policy("ns1", "P1", json!({"a": 1})),
        &["example.com/keep"],
    ));

    env.reconciler.reconcile(&p1()).await;
    assert_eq!(
        env.hub_policy(&p1()).unwrap().finalizers(),
        &["example.com/keep".to_string(), SPEC_SYNC_FINALIZER.to_string()]
    );

    env.hub.delete(&p1()).await.unwrap();
    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    let hub = env.hub_policy(&p1()).expect("other finalizer still holds it");
    assert_eq!(hub.finalizers(), &["example.com/keep".to_string()]);
    assert!(env.managed_policy(&p1()).is_none());
}

#[tokio::test]
async fn test_deleting_hub_without_our_finalizer_still_clears_mirror() {
    let env = TestEnv::new();
    env.hub.insert(deleting(with_finalizers(
        policy("ns1", "P1", json!({"a": 1})),
        &["example.com/keep"],
    )));
    env.managed
        .insert(build_mirror(&p1(), &policy("ns1", "P1", json!({"a": 1}))));

    assert_eq!(env.reconciler.reconcile(&p1()).await, ReconcileOutcome::Done);
    assert!(env.managed_policy(&p1()).is_none());
    assert_eq!(env.hub.write_count(), 0);
}

#[test]
fn test_build_mirror_copies_metadata_and_marks_source() {
    let mut hub = policy("ns1", "P1", json!({"a": 1}));
    hub.labels_mut().insert("app".to_string(), "web".to_string());
    hub.annotations_mut().insert(
        "kubectl.kubernetes.io/last-applied-configuration".to_string(),
        "{}".to_string(),
    );
    hub.metadata.resource_version = Some("42".to_string());
    hub.finalizers_mut().push(SPEC_SYNC_FINALIZER.to_string());

    let mirror = build_mirror(&p1(), &hub);
    assert_eq!(mirror.metadata.namespace.as_deref(), Some("ns1"));
    assert_eq!(mirror.labels().get("app").map(String::as_str), Some("web"));
    assert!(is_mirror(&mirror));
    assert_eq!(mirror_source(&mirror), Some(p1()));
    assert!(
        !mirror
            .annotations()
            .contains_key("kubectl.kubernetes.io/last-applied-configuration")
    );
    assert!(mirror.metadata.resource_version.is_none());
    assert!(mirror.finalizers().is_empty());
    assert_eq!(mirror.spec, hub.spec);
}

#[test]
fn test_outcome_labels() {
    assert_eq!(ReconcileOutcome::Done.label(), "done");
    assert_eq!(ReconcileOutcome::RequeueAfter(Duration::from_secs(1)).label(), "requeue");
    assert_eq!(ReconcileOutcome::Fatal("x".into()).label(), "fatal");
}
