//! Prometheus metrics for tuition-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

/// Histogram for database query duration, local and external stores alike.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tuition_db_query_duration_seconds",
        "Database query duration in seconds",
        &["store", "operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for reconciliation scans by result.
pub static RECONCILIATION_SCANS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tuition_reconciliation_scans_total",
        "Total number of reconciliation scans",
        &["status"]
    )
    .expect("Failed to register RECONCILIATION_SCANS")
});

/// Counter for per-bill reconciliation outcomes.
pub static RECONCILIATION_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tuition_reconciliation_outcomes_total",
        "Reconciliation decisions by outcome",
        &["outcome"]
    )
    .expect("Failed to register RECONCILIATION_OUTCOMES")
});

pub static SCAN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tuition_scan_duration_seconds",
        "Duration of one reconciliation scan in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("Failed to register SCAN_DURATION")
});

/// Counter for generated bills by generation path.
pub static BILLS_GENERATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tuition_bills_generated_total",
        "Total number of bills generated",
        &["path"]
    )
    .expect("Failed to register BILLS_GENERATED")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tuition_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Recorder behind the `metrics` facade used by the HTTP middleware.
static HTTP_METRICS: Lazy<Option<PrometheusHandle>> =
    Lazy::new(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder not installed");
            None
        }
    });

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_METRICS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&RECONCILIATION_SCANS);
    Lazy::force(&RECONCILIATION_OUTCOMES);
    Lazy::force(&SCAN_DURATION);
    Lazy::force(&BILLS_GENERATED);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format: the engine registry followed
/// by HTTP request metrics.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    let mut text = String::from_utf8(buffer).unwrap_or_default();
    if let Some(handle) = HTTP_METRICS.as_ref() {
        text.push_str(&handle.render());
    }
    text
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record the result of a reconciliation scan.
pub fn record_scan(status: &str) {
    RECONCILIATION_SCANS.with_label_values(&[status]).inc();
}

/// Record a per-bill reconciliation decision.
pub fn record_outcome(outcome: &str) {
    RECONCILIATION_OUTCOMES.with_label_values(&[outcome]).inc();
}

/// Record bills created by the generator.
pub fn record_bills_generated(path: &str, count: usize) {
    BILLS_GENERATED
        .with_label_values(&[path])
        .inc_by(count as f64);
}
