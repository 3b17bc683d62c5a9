//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels identifying one Extension
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ExtensionLabels {
    pub name: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ExtensionLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for failed passes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ErrorLabels {
    pub name: String,
    pub reason: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ErrorLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("reason", self.reason.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for SQL mutations
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ActionLabels {
    pub action: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ActionLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("action", self.action.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ExtensionLabels, Counter>,
    /// Failed reconciliations counter, by error kind
    pub reconciliation_errors_total: Family<ErrorLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ExtensionLabels, Histogram>,
    /// Create/update/drop statements issued
    pub extension_actions_total: Family<ActionLabels, Counter>,
    /// 1 when an Extension is Ready, 0 otherwise
    pub extension_ready: Family<ExtensionLabels, Gauge>,

    /// Error reasons recorded per Extension, so `forget` can find their series
    error_reasons: Mutex<HashMap<String, BTreeSet<String>>>,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ExtensionLabels, Counter>::default();
        registry.register(
            "extension_operator_reconciliations",
            "Total number of reconcile passes",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "extension_operator_reconciliation_errors",
            "Total number of failed reconcile passes",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ExtensionLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "extension_operator_reconcile_duration_seconds",
            "Duration of reconcile passes in seconds",
            reconcile_duration_seconds.clone(),
        );

        let extension_actions_total = Family::<ActionLabels, Counter>::default();
        registry.register(
            "extension_operator_actions",
            "Total number of extension create, update and drop statements",
            extension_actions_total.clone(),
        );

        let extension_ready = Family::<ExtensionLabels, Gauge>::default();
        registry.register(
            "extension_operator_extension_ready",
            "Whether each Extension is installed and up to date",
            extension_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            extension_actions_total,
            extension_ready,
            error_reasons: Mutex::new(HashMap::new()),
            registry,
        }
    }

    fn labels(name: &str) -> ExtensionLabels {
        ExtensionLabels {
            name: name.to_string(),
        }
    }

    /// Record a completed reconcile pass
    pub fn record_reconcile(&self, name: &str, duration_secs: f64) {
        let labels = Self::labels(name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconcile pass
    pub fn record_error(&self, name: &str, reason: &str) {
        let labels = ErrorLabels {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
        if let Ok(mut reasons) = self.error_reasons.lock() {
            reasons
                .entry(labels.name)
                .or_default()
                .insert(labels.reason);
        }
    }

    /// Record a mutating statement
    pub fn record_action(&self, action: &str) {
        let labels = ActionLabels {
            action: action.to_string(),
        };
        self.extension_actions_total.get_or_create(&labels).inc();
    }

    pub fn set_ready(&self, name: &str, ready: bool) {
        self.extension_ready
            .get_or_create(&Self::labels(name))
            .set(i64::from(ready));
    }

    /// Stop reporting an Extension that no longer exists
    pub fn forget(&self, name: &str) {
        let labels = Self::labels(name);
        self.extension_ready.remove(&labels);
        self.reconciliations_total.remove(&labels);
        self.reconcile_duration_seconds.remove(&labels);

        let reasons = self
            .error_reasons
            .lock()
            .ok()
            .and_then(|mut reasons| reasons.remove(name))
            .unwrap_or_default();
        for reason in reasons {
            self.reconciliation_errors_total.remove(&ErrorLabels {
                name: name.to_string(),
                reason,
            });
        }
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails (should never happen with valid metrics).
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (controller running)
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile, seconds since the Unix epoch
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn touch_last_reconcile(&self) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on the given port
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");

    axum::serve(listener, app).await
}
