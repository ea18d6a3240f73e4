//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Download engine (task outcomes, bytes, durations)
//! - Rate limiter (admission waits, throttle events)
//! - Proxy pool (health)

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Engine - Task Metrics
// =============================================================================

/// Tasks finished, by terminal state and source.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("magpie_tasks_finished_total", "Total tasks finished"),
        &["source", "state"], // state: "completed", "failed", "skipped", "cancelled"
    )
    .unwrap()
});

/// Bytes written to disk.
pub static BYTES_TRANSFERRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "magpie_bytes_transferred_total",
        "Total bytes written to destination files",
    )
    .unwrap()
});

/// Fetch attempts, by result.
pub static FETCH_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("magpie_fetch_attempts_total", "Total fetch attempts"),
        &["source", "result"], // result: "success", "transient", "permanent"
    )
    .unwrap()
});

/// Per-task wall time from admission to terminal state.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("magpie_task_duration_seconds", "Duration of tasks")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["source"],
    )
    .unwrap()
});

/// Jobs submitted.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("magpie_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Jobs that reached a fully drained state.
pub static JOBS_DRAINED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("magpie_jobs_drained_total", "Total jobs fully drained").unwrap()
});

// =============================================================================
// Rate Limiter Metrics
// =============================================================================

/// Time spent waiting for admission.
pub static ADMISSION_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "magpie_admission_wait_seconds",
            "Time tasks spent waiting for a rate limit token",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0]),
        &["source"],
    )
    .unwrap()
});

/// Remote throttle (HTTP 429) reports.
pub static THROTTLE_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "magpie_throttle_events_total",
            "HTTP 429 responses fed back into the rate limiter",
        ),
        &["source"],
    )
    .unwrap()
});

// =============================================================================
// Proxy Pool Metrics
// =============================================================================

/// Proxies currently eligible for rotation.
pub static PROXIES_HEALTHY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "magpie_proxies_healthy",
        "Proxies currently eligible for rotation",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_FINISHED.clone()),
        Box::new(BYTES_TRANSFERRED.clone()),
        Box::new(FETCH_ATTEMPTS.clone()),
        Box::new(TASK_DURATION.clone()),
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_DRAINED.clone()),
        Box::new(ADMISSION_WAIT.clone()),
        Box::new(THROTTLE_EVENTS.clone()),
        Box::new(PROXIES_HEALTHY.clone()),
    ]
}
