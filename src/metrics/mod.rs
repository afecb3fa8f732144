//! Prometheus metrics for the dispatcher core.
//!
//! Task lifecycle counters, delivery counters and latency, and circuit
//! breaker rejections. The embedding application scrapes these through
//! [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "beacon";

lazy_static! {
    // ============================================================================
    // Task Queue Metrics
    // ============================================================================

    /// Total tasks accepted by a queue
    pub static ref TASKS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tasks_enqueued_total", METRIC_PREFIX),
        "Total tasks accepted by a queue"
    ).unwrap();

    /// Total tasks that completed successfully
    pub static ref TASKS_COMPLETED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tasks_completed_total", METRIC_PREFIX),
        "Total tasks that completed successfully"
    ).unwrap();

    /// Total tasks that failed permanently after exhausting retries
    pub static ref TASKS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tasks_failed_total", METRIC_PREFIX),
        "Total tasks that failed permanently"
    ).unwrap();

    /// Total task retries (re-queues after a failed attempt)
    pub static ref TASKS_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tasks_retried_total", METRIC_PREFIX),
        "Total task re-queues after a failed attempt"
    ).unwrap();

    /// Tasks currently waiting in ready queues
    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Tasks currently waiting in ready queues"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Channel sends by channel and final status (after channel-level retries)
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Channel sends by channel and final status",
        &["channel", "status"]
    ).unwrap();

    /// Delivery latency per channel, including channel-level retries
    pub static ref DELIVERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        format!("{}_delivery_duration_seconds", METRIC_PREFIX),
        "Delivery latency per channel",
        &["channel"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Notifications archived to the notification store
    pub static ref NOTIFICATIONS_ARCHIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_archived_total", METRIC_PREFIX),
        "Notifications archived to the notification store"
    ).unwrap();

    // ============================================================================
    // Circuit Breaker Metrics
    // ============================================================================

    /// Notify calls rejected because the circuit was open
    pub static ref CIRCUIT_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_circuit_rejections_total", METRIC_PREFIX),
        "Notify calls rejected because the circuit was open"
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
