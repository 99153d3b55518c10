//! Metrics collection and export for the Kinema server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const INGESTS_TOTAL: &str = "kinema_ingests_total";
    pub const BROADCASTS_TOTAL: &str = "kinema_broadcasts_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "kinema_subscribers_active";
    pub const RECORDS_DELETED_TOTAL: &str = "kinema_records_deleted_total";
    pub const INGEST_LATENCY_SECONDS: &str = "kinema_ingest_latency_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::INGESTS_TOTAL,
        "Total ingest calls by outcome (accepted, rejected, failed)"
    );
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Total broadcast decisions by outcome (sent, suppressed)"
    );
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of live subscribers"
    );
    metrics::describe_counter!(
        names::RECORDS_DELETED_TOTAL,
        "Total records removed by administrative deletes"
    );
    metrics::describe_histogram!(
        names::INGEST_LATENCY_SECONDS,
        "Ingest call latency in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an ingest call outcome.
pub fn record_ingest(outcome: &str) {
    counter!(names::INGESTS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Record a broadcast decision.
pub fn record_broadcast(sent: bool) {
    let outcome = if sent { "sent" } else { "suppressed" };
    counter!(names::BROADCASTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record administratively deleted records.
pub fn record_deleted(count: u64) {
    counter!(names::RECORDS_DELETED_TOTAL).increment(count);
}

/// Record ingest latency.
pub fn record_ingest_latency(seconds: f64) {
    histogram!(names::INGEST_LATENCY_SECONDS).record(seconds);
}

/// Metrics guard that tracks one live subscriber for its lifetime.
pub struct SubscriberMetricsGuard;

impl SubscriberMetricsGuard {
    /// Create a new guard, incrementing the active-subscriber gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::SUBSCRIBERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SubscriberMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriberMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SUBSCRIBERS_ACTIVE).decrement(1.0);
    }
}
