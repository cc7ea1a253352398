//! Probe and metrics endpoints
//!
//! - `/healthz` answers as long as the process runs
//! - `/readyz` answers 200 once the first PostgresBootstrap list has been cached
//! - `/metrics` serves the Prometheus registry in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

use crate::controller::error::{BootstrapError, ErrorKind};
use crate::crd::ObjectKey;

const METRIC_PREFIX: &str = "pgbootstrap";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ObjectLabels {
    pub namespace: String,
    pub name: String,
}

impl From<&ObjectKey> for ObjectLabels {
    fn from(key: &ObjectKey) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum FailureKind {
    Transient,
    Conflict,
    Validation,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Transient => FailureKind::Transient,
            ErrorKind::Conflict => FailureKind::Conflict,
            ErrorKind::Validation => FailureKind::Validation,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FailureLabels {
    pub namespace: String,
    pub name: String,
    pub kind: FailureKind,
}

/// Controller metrics, all registered under the `pgbootstrap_` prefix
pub struct Metrics {
    pub reconciliations: Family<ObjectLabels, Counter>,
    pub failures: Family<FailureLabels, Counter>,
    pub reconcile_duration_seconds: Family<ObjectLabels, Histogram>,
    /// Credential sets generated and written to a Secret
    pub credentials_generated: Family<ObjectLabels, Counter>,
    /// Reconcile passes currently running
    pub passes_in_flight: Gauge,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRIC_PREFIX);

        let reconciliations = Family::default();
        registry.register(
            "reconciliations",
            "Successful reconcile passes",
            reconciliations.clone(),
        );

        let failures = Family::default();
        registry.register(
            "reconciliation_errors",
            "Failed reconcile passes by failure kind",
            failures.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ObjectLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 14))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of successful reconcile passes",
            reconcile_duration_seconds.clone(),
        );

        let credentials_generated = Family::default();
        registry.register(
            "credentials_generated",
            "Credential sets generated and written to a Secret",
            credentials_generated.clone(),
        );

        let passes_in_flight = Gauge::default();
        registry.register(
            "passes_in_flight",
            "Reconcile passes currently running",
            passes_in_flight.clone(),
        );

        Self {
            reconciliations,
            failures,
            reconcile_duration_seconds,
            credentials_generated,
            passes_in_flight,
            registry,
        }
    }

    pub fn record_success(&self, key: &ObjectKey, elapsed: Duration, credentials_generated: bool) {
        let labels = ObjectLabels::from(key);
        self.reconciliations.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());
        if credentials_generated {
            self.credentials_generated.get_or_create(&labels).inc();
        }
    }

    pub fn record_failure(&self, key: &ObjectKey, kind: ErrorKind) {
        self.failures
            .get_or_create(&FailureLabels {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                kind: kind.into(),
            })
            .inc();
    }

    /// Count a pass as running until the guard is dropped
    pub fn track_pass(&self) -> InFlightGuard {
        self.passes_in_flight.inc();
        InFlightGuard(self.passes_in_flight.clone())
    }

    /// Prometheus text exposition of every metric, empty if encoding fails
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        match encode(&mut buffer, &self.registry) {
            Ok(()) => buffer,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

/// Decrements the in-flight gauge when dropped
pub struct InFlightGuard(Gauge);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// State shared between the controller and the probe server
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    /// Unix time of the last successful pass, 0 before the first one
    last_success: AtomicI64,
    pub metrics: Metrics,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_success(&self) {
        self.last_success
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Unix time of the last successful pass, if any
    pub fn last_success(&self) -> Option<i64> {
        Some(self.last_success.load(Ordering::Relaxed)).filter(|t| *t > 0)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for initial list")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe endpoints on `addr` until the listener fails
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), BootstrapError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
