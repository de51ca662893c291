//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Quotes**: records received from upstream, sent to clients, dropped
//! - **Upstream**: sessions started, errors by kind, connection gauge
//! - **Clients**: attached SSE clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent: later calls return the handle created by the first one.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            #[allow(clippy::expect_used)]
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_relay_quotes_received_total",
        "Total quotes decoded from the upstream feed"
    );
    describe_counter!(
        "quote_relay_quotes_sent_total",
        "Total SSE events written to clients"
    );
    describe_counter!(
        "quote_relay_quotes_dropped_total",
        "Total quotes skipped by lagging subscribers"
    );

    describe_counter!(
        "quote_relay_upstream_sessions_total",
        "Total upstream sessions opened"
    );
    describe_counter!(
        "quote_relay_upstream_errors_total",
        "Total upstream sessions ended by an error, by kind"
    );
    describe_gauge!(
        "quote_relay_upstream_connected",
        "1 while the upstream stream is open"
    );

    describe_gauge!(
        "quote_relay_sse_clients",
        "Number of attached SSE clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a quote decoded from the upstream feed.
pub fn record_quote_received() {
    counter!("quote_relay_quotes_received_total").increment(1);
}

/// Record an SSE event written to one client.
pub fn record_quote_sent() {
    counter!("quote_relay_quotes_sent_total").increment(1);
}

/// Record quotes skipped by a lagging subscriber.
pub fn record_quotes_dropped(count: u64) {
    counter!("quote_relay_quotes_dropped_total").increment(count);
}

/// Record an upstream session start.
pub fn record_upstream_session() {
    counter!("quote_relay_upstream_sessions_total").increment(1);
}

/// Record an upstream session failure.
pub fn record_upstream_error(kind: &'static str) {
    counter!("quote_relay_upstream_errors_total", "kind" => kind).increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("quote_relay_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the attached client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_sse_clients(count: usize) {
    gauge!("quote_relay_sse_clients").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
