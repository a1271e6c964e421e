//! Main controller implementation.
//!
//! Wires the hub and managed clients, the work queue, watchers, reconcile
//! workers, the periodic resync and the probe/metrics servers, and runs them
//! until a shutdown signal arrives.

use crate::config::Config;
use crate::error::{Cluster, ControllerError};
use crate::events::KubeEventRecorder;
use crate::health::{self, HealthState};
use crate::metrics::{self, Metrics};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::watcher::{self, Watcher};
use crate::workqueue::WorkQueue;
use crds::PolicyRef;
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use policy_client::{KubePolicyClient, PolicyClientTrait};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds a client from a kubeconfig path, or from the environment when none
/// is given.
async fn create_client(cluster: Cluster, kubeconfig: Option<&str>) -> Result<Client, ControllerError> {
    match kubeconfig {
        Some(path) => {
            info!("Loading {} kubeconfig from {}", cluster, path);
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                ControllerError::InvalidConfig(format!("failed to read {} kubeconfig {}: {}", cluster, path, e))
            })?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    ControllerError::InvalidConfig(format!("failed to load {} kubeconfig {}: {}", cluster, path, e))
                })?;
            Ok(Client::try_from(config)?)
        }
        None => {
            info!("No {} kubeconfig given, using in-cluster or default configuration", cluster);
            Ok(Client::try_default().await?)
        }
    }
}

/// Main controller for policy spec synchronization.
pub struct Controller {
    queue: Arc<WorkQueue<PolicyRef>>,
    shutdown_tx: watch::Sender<bool>,
    hub_watcher: JoinHandle<Result<(), ControllerError>>,
    managed_watcher: JoinHandle<Result<(), ControllerError>>,
    workers: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Policy Spec Sync Controller");

        let hub_client = create_client(Cluster::Hub, config.hub_kubeconfig.as_deref()).await?;
        let managed_client = create_client(Cluster::Managed, config.managed_kubeconfig.as_deref()).await?;

        let hub: Arc<dyn PolicyClientTrait> = Arc::new(KubePolicyClient::new(hub_client.clone(), "hub"));
        let managed: Arc<dyn PolicyClientTrait> =
            Arc::new(KubePolicyClient::new(managed_client.clone(), "managed"));

        let health = Arc::new(HealthState::new(config.degraded_threshold));
        let metrics = Arc::new(Metrics::new()?);
        let queue = Arc::new(WorkQueue::new());
        let recorder = Arc::new(KubeEventRecorder::new(managed_client.clone()));

        let reconciler = Arc::new(Reconciler::new(
            hub.clone(),
            managed.clone(),
            recorder,
            health.clone(),
            config.backoff_base,
            config.backoff_max,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Servers come up first so probes answer while the caches fill
        let mut background = Vec::new();
        background.push(tokio::spawn({
            let health = health.clone();
            let addr = config.probe_addr;
            let shutdown = wait_for_shutdown(shutdown_rx.clone());
            async move {
                if let Err(e) = health::serve_probes(addr, health, shutdown).await {
                    error!("Probe server failed: {}", e);
                }
            }
        }));
        background.push(tokio::spawn({
            let metrics = metrics.clone();
            let addr = config.metrics_addr;
            let shutdown = wait_for_shutdown(shutdown_rx.clone());
            async move {
                if let Err(e) = metrics::serve_metrics(addr, metrics, shutdown).await {
                    error!("Metrics server failed: {}", e);
                }
            }
        }));

        info!("Watching policies in {}", config.namespace_scope());
        let hub_watcher = tokio::spawn(
            Watcher::new(Cluster::Hub, hub_client, &config.namespaces, queue.clone(), health.clone()).run(),
        );
        let managed_watcher = tokio::spawn(
            Watcher::new(Cluster::Managed, managed_client, &config.namespaces, queue.clone(), health.clone())
                .run(),
        );

        background.push(tokio::spawn(watcher::resync_loop(
            hub,
            managed,
            config.namespaces.clone(),
            queue.clone(),
            config.resync_period,
        )));

        let workers = (0..config.workers)
            .map(|id| tokio::spawn(run_worker(id, queue.clone(), reconciler.clone(), metrics.clone())))
            .collect();
        info!("Started {} reconcile workers", config.workers);

        Ok(Self {
            queue,
            shutdown_tx,
            hub_watcher,
            managed_watcher,
            workers,
            background,
        })
    }

    /// Runs the controller until a shutdown signal or a watcher failure.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Policy Spec Sync Controller running");

        let result = tokio::select! {
            signal = shutdown_signal() => {
                info!("Received {}, shutting down", signal);
                Ok(())
            }
            result = &mut self.hub_watcher => {
                flatten_watcher("hub", result)
            }
            result = &mut self.managed_watcher => {
                flatten_watcher("managed", result)
            }
        };

        // Stop intake, let in-flight reconciles finish
        self.queue.shut_down();
        self.hub_watcher.abort();
        self.managed_watcher.abort();
        let _ = self.shutdown_tx.send(true);

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Reconcile worker ended abnormally: {}", e);
            }
        }
        for task in self.background {
            task.abort();
            let _ = task.await;
        }
        info!("Policy Spec Sync Controller stopped");
        result
    }
}

fn flatten_watcher(
    name: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} watcher panicked: {}", name, e)))?
        .map_err(|e| {
            error!("{} watcher stopped: {}", name, e);
            e
        })
}

async fn run_worker(
    id: usize,
    queue: Arc<WorkQueue<PolicyRef>>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
) {
    debug!("Reconcile worker {} started", id);
    while let Some(policy_ref) = queue.next().await {
        metrics.set_queue_depth(queue.len());
        let started = Instant::now();
        let outcome = reconciler.reconcile(&policy_ref).await;
        metrics.observe_reconcile(outcome.label(), started.elapsed());

        if let ReconcileOutcome::RequeueAfter(delay) = outcome {
            queue.add_after(policy_ref.clone(), delay);
        }
        queue.done(&policy_ref);
    }
    debug!("Reconcile worker {} stopped", id);
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Resolves on SIGINT or SIGTERM and names the signal
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
