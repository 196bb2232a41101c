//! Prometheus metrics for dawnbell
//!
//! This module provides metrics tracking for:
//! - Gate: scheduler ticks, lock acquisitions, reservations, deliveries, errors by category
//! - HTTP surface: API requests, rate-limit rejections, tracked clients
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for gate metrics
struct GateMetrics {
    ticks: CounterVec,
    lock_acquisitions: CounterVec,
    reservations: CounterVec,
    deliveries: CounterVec,
    executor_duration: HistogramVec,
    scheduler_running: Gauge,
    errors: CounterVec,
}

/// Container for HTTP surface metrics
struct ApiMetrics {
    api_requests: CounterVec,
    api_duration: HistogramVec,
    rate_limit_rejections: CounterVec,
    tracked_clients: Gauge,
}

static GATE_METRICS: OnceLock<GateMetrics> = OnceLock::new();

static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = dawnbell::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let gate = GateMetrics {
        ticks: register_counter_vec!(
            "dawnbell_gate_ticks_total",
            "Gate evaluations by outcome",
            &["source", "outcome"]
        )?,
        lock_acquisitions: register_counter_vec!(
            "dawnbell_lock_acquisitions_total",
            "Advisory lock attempts by outcome",
            &["outcome"]
        )?,
        reservations: register_counter_vec!(
            "dawnbell_reservations_total",
            "Slot reservation attempts by broadcast type and result",
            &["broadcast_type", "result"]
        )?,
        deliveries: register_counter_vec!(
            "dawnbell_deliveries_total",
            "Recipients reported by the executor",
            &["broadcast_type", "status"]
        )?,
        executor_duration: register_histogram_vec!(
            "dawnbell_executor_duration_seconds",
            "Broadcast executor run time in seconds",
            &["broadcast_type"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        scheduler_running: register_gauge!(
            "dawnbell_scheduler_running",
            "Whether the internal scheduler loop is running (1 = yes, 0 = no)"
        )?,
        errors: register_counter_vec!(
            "dawnbell_errors_total",
            "Handled failures by operation and error category",
            &["operation", "category"]
        )?,
    };

    let api = ApiMetrics {
        api_requests: register_counter_vec!(
            "dawnbell_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "dawnbell_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
        rate_limit_rejections: register_counter_vec!(
            "dawnbell_rate_limit_rejections_total",
            "Requests rejected by the rate limiter, by window",
            &["window"]
        )?,
        tracked_clients: register_gauge!(
            "dawnbell_rate_limit_tracked_clients",
            "Clients currently tracked by the rate limiter"
        )?,
    };

    GATE_METRICS
        .set(gate)
        .map_err(|_| "Gate metrics already initialized")?;
    API_METRICS
        .set(api)
        .map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    GATE_METRICS.get().is_some() && API_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Count a handled failure
pub fn record_error(operation: &str, category: &str) {
    if let Some(m) = GATE_METRICS.get() {
        m.errors.with_label_values(&[operation, category]).inc();
    }
}

/// Current value of the error counter, 0 when metrics are not initialized
pub fn error_count(operation: &str, category: &str) -> f64 {
    GATE_METRICS
        .get()
        .map(|m| m.errors.with_label_values(&[operation, category]).get())
        .unwrap_or(0.0)
}

/// Record one gate evaluation
pub fn record_tick(source: &str, outcome: &str) {
    if let Some(m) = GATE_METRICS.get() {
        m.ticks.with_label_values(&[source, outcome]).inc();
    }
}

/// Record an advisory lock attempt
pub fn record_lock_acquisition(outcome: &str) {
    if let Some(m) = GATE_METRICS.get() {
        m.lock_acquisitions.with_label_values(&[outcome]).inc();
    }
}

/// Record a reservation attempt (`won`, `lost`, `error`)
pub fn record_reservation(broadcast_type: &str, result: &str) {
    if let Some(m) = GATE_METRICS.get() {
        m.reservations
            .with_label_values(&[broadcast_type, result])
            .inc();
    }
}

/// Record delivery counts reported by the executor
pub fn record_deliveries(broadcast_type: &str, sent: u32, failed: u32) {
    let Some(m) = GATE_METRICS.get() else {
        return;
    };

    if sent > 0 {
        m.deliveries
            .with_label_values(&[broadcast_type, "sent"])
            .inc_by(sent as f64);
    }
    if failed > 0 {
        m.deliveries
            .with_label_values(&[broadcast_type, "failed"])
            .inc_by(failed as f64);
    }
}

pub fn set_scheduler_running(running: bool) {
    if let Some(m) = GATE_METRICS.get() {
        m.scheduler_running.set(if running { 1.0 } else { 0.0 });
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record a rate-limit rejection
pub fn record_rate_limit_rejection(window: &str) {
    if let Some(m) = API_METRICS.get() {
        m.rate_limit_rejections.with_label_values(&[window]).inc();
    }
}

pub fn set_tracked_clients(count: usize) {
    if let Some(m) = API_METRICS.get() {
        m.tracked_clients.set(count as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an executor timer (records when dropped)
pub fn start_executor_timer(broadcast_type: &str) -> MetricsTimer {
    match GATE_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.executor_duration
                .with_label_values(&[broadcast_type])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
