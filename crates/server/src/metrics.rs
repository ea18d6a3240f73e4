//! Prometheus metrics for observability.
//!
//! Server-side metrics (WebSocket connections) plus the core engine
//! metrics, all gathered into one registry and rendered as text for the
//! `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket subscriptions.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "magpie_ws_connections_active",
        "Number of active WebSocket subscriptions",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "magpie_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// Snapshots pushed to WebSocket clients.
pub static WS_SNAPSHOTS_SENT: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "magpie_ws_snapshots_sent_total",
        "Progress snapshots sent over WebSocket",
    )
    .unwrap()
});

/// WebSocket lag events (client fell behind the snapshot stream).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "magpie_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_SNAPSHOTS_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Core engine metrics
    for metric in magpie_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        WS_CONNECTIONS_TOTAL.inc();
        magpie_core::metrics::JOBS_SUBMITTED.inc();

        let output = encode_metrics();
        assert!(output.contains("magpie_ws_connections_total"));
        assert!(output.contains("magpie_jobs_submitted_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
