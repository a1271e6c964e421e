//! Prometheus metrics for the reconcile loop.

use crate::error::ControllerError;
use axum::{Router, extract::State, http::StatusCode, http::header, response::IntoResponse, routing::get};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: Histogram,
    queue_depth: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "policy_spec_sync_reconcile_total",
                "Reconcile attempts by result",
            ),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "policy_spec_sync_reconcile_duration_seconds",
                "Time spent in a single reconcile",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        let queue_depth = IntGauge::new(
            "policy_spec_sync_queue_depth",
            "Keys waiting in the work queue",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            queue_depth,
        })
    }

    /// `result` is one of `done`, `requeue` or `fatal`
    pub fn observe_reconcile(&self, result: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    #[cfg(test)]
    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[result]).get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(metrics)
}

/// Serve `/metrics` until `shutdown` resolves
pub async fn serve_metrics<F>(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind metrics server on {}: {}", addr, e);
        e
    })?;
    info!("Metrics server listening on {}", addr);

    axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(shutdown)
        .await
}
