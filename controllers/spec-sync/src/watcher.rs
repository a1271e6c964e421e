//! Policy watchers for both clusters.
//!
//! Watch events only feed the work queue: the reconciler re-reads both
//! clusters itself, so an event contributes nothing but its key. Watch
//! streams retry with the runtime's default backoff and never end on error.

use crate::error::{Cluster, ControllerError};
use crate::health::HealthState;
use crate::workqueue::WorkQueue;
use crds::{Policy, PolicyRef, mirror_source};
use futures::StreamExt;
use kube::Api;
use kube_runtime::{WatchStreamExt, watcher};
use policy_client::PolicyClientTrait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keys for a hub policy
pub fn hub_policy_refs(policy: &Policy) -> Vec<PolicyRef> {
    PolicyRef::from_policy(policy).into_iter().collect()
}

/// Keys for a managed policy: its own name, plus the hub source recorded on
/// it when that points elsewhere. Reconciling the own name removes a copy
/// that lives at the wrong place; reconciling the source recreates the
/// mirror where it belongs.
pub fn managed_policy_refs(policy: &Policy) -> Vec<PolicyRef> {
    let own = PolicyRef::from_policy(policy);
    let source = mirror_source(policy).filter(|source| own.as_ref() != Some(source));
    own.into_iter().chain(source).collect()
}

fn key_fn(cluster: Cluster) -> fn(&Policy) -> Vec<PolicyRef> {
    match cluster {
        Cluster::Hub => hub_policy_refs,
        Cluster::Managed => managed_policy_refs,
    }
}

/// Watches `Policy` objects on one cluster and feeds the work queue.
pub struct Watcher {
    cluster: Cluster,
    apis: Vec<Api<Policy>>,
    queue: Arc<WorkQueue<PolicyRef>>,
    health: Arc<HealthState>,
}

impl Watcher {
    /// One watch per namespace, or a single cluster-wide watch when
    /// `namespaces` is empty
    pub fn new(
        cluster: Cluster,
        client: kube::Client,
        namespaces: &[String],
        queue: Arc<WorkQueue<PolicyRef>>,
        health: Arc<HealthState>,
    ) -> Self {
        let apis = if namespaces.is_empty() {
            vec![Api::all(client)]
        } else {
            namespaces
                .iter()
                .map(|ns| Api::namespaced(client.clone(), ns))
                .collect()
        };
        Self {
            cluster,
            apis,
            queue,
            health,
        }
    }

    /// Runs until every watch stream ends, which only happens on shutdown
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Starting {} policy watcher ({} streams)", self.cluster, self.apis.len());
        let pending = Arc::new(AtomicUsize::new(self.apis.len()));

        let streams = self.apis.into_iter().map(|api| {
            watch_stream(
                self.cluster,
                api,
                self.queue.clone(),
                self.health.clone(),
                pending.clone(),
            )
        });
        futures::future::join_all(streams).await;

        Err(ControllerError::Watch(format!(
            "{} policy watch streams ended",
            self.cluster
        )))
    }
}

async fn watch_stream(
    cluster: Cluster,
    api: Api<Policy>,
    queue: Arc<WorkQueue<PolicyRef>>,
    health: Arc<HealthState>,
    pending: Arc<AtomicUsize>,
) {
    let key_for = key_fn(cluster);
    let mut initialized = false;
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(policy))
            | Ok(watcher::Event::InitApply(policy))
            | Ok(watcher::Event::Delete(policy)) => {
                for policy_ref in key_for(&policy) {
                    debug!("{} policy event for {}", cluster, policy_ref);
                    queue.add(policy_ref);
                }
            }
            Ok(watcher::Event::Init) => {
                debug!("{} policy watch (re)listing", cluster);
            }
            Ok(watcher::Event::InitDone) => {
                if !initialized {
                    initialized = true;
                    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        health.mark_synced(cluster);
                    }
                }
            }
            Err(e) => {
                warn!("{} policy watch error (retrying): {}", cluster, e);
            }
        }
        if queue.is_shutting_down() {
            break;
        }
    }
}

/// Lists both clusters and enqueues every key found. Returns the number of
/// objects listed.
pub async fn resync_all(
    hub: &dyn PolicyClientTrait,
    managed: &dyn PolicyClientTrait,
    namespaces: &[String],
    queue: &WorkQueue<PolicyRef>,
) -> Result<usize, ControllerError> {
    let scopes: Vec<Option<&str>> = if namespaces.is_empty() {
        vec![None]
    } else {
        namespaces.iter().map(|ns| Some(ns.as_str())).collect()
    };

    let mut seen = 0;
    for scope in scopes {
        for policy in hub.list(scope, None).await.map_err(ControllerError::hub)? {
            hub_policy_refs(&policy).into_iter().for_each(|r| queue.add(r));
            seen += 1;
        }
        for policy in managed
            .list(scope, None)
            .await
            .map_err(ControllerError::managed)?
        {
            managed_policy_refs(&policy).into_iter().for_each(|r| queue.add(r));
            seen += 1;
        }
    }
    Ok(seen)
}

/// Periodic full resync; the first run happens one `period` after start since
/// the watchers' initial lists cover startup.
pub async fn resync_loop(
    hub: Arc<dyn PolicyClientTrait>,
    managed: Arc<dyn PolicyClientTrait>,
    namespaces: Vec<String>,
    queue: Arc<WorkQueue<PolicyRef>>,
    period: Duration,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if queue.is_shutting_down() {
            break;
        }
        match resync_all(hub.as_ref(), managed.as_ref(), &namespaces, &queue).await {
            Ok(seen) => debug!("Periodic resync enqueued {} policies", seen),
            Err(e) => warn!("Periodic resync failed: {}", e),
        }
    }
}
