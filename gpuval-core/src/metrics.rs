//! Prometheus metrics for validation runs

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    register_int_gauge_vec, Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

use crate::result::ProbeStatus;

/// Probe status metric (0=passed, 1=warning, 2=failed, 3=unknown)
static PROBE_STATUS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!("gpuval_probe_status", "Outcome of the last run of each probe"),
        &["probe"]
    )
    .expect("Failed to create probe_status metric")
});

/// Probe duration histogram
static PROBE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gpuval_probe_duration_seconds",
        "Duration of probe evaluation",
        &["probe"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to create probe_duration metric")
});

/// Workloads that could not be removed cleanly
static TEARDOWN_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gpuval_workload_teardown_failures_total",
            "Diagnostic workloads whose deletion failed or found nothing to delete"
        ),
        &["node"]
    )
    .expect("Failed to create teardown_failures metric")
});

/// Poll attempts used before the diagnostic exec
static POLL_ATTEMPTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "gpuval_workload_poll_attempts",
            "Phase polls issued before exercising the diagnostic workload"
        ),
        &["node"]
    )
    .expect("Failed to create poll_attempts metric")
});

fn status_value(status: ProbeStatus) -> f64 {
    match status {
        ProbeStatus::Passed => 0.0,
        ProbeStatus::Warning => 1.0,
        ProbeStatus::Failed => 2.0,
        ProbeStatus::Unknown => 3.0,
    }
}

/// Metrics registry wrapper
#[derive(Debug, Clone, Copy)]
pub struct MetricsRegistry;

impl MetricsRegistry {
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*PROBE_STATUS;
        let _ = &*PROBE_DURATION;
        let _ = &*TEARDOWN_FAILURES;
        let _ = &*POLL_ATTEMPTS;
        Self
    }

    /// Record a probe outcome and how long it took
    pub fn record_probe(&self, probe: &str, status: ProbeStatus, elapsed: Duration) {
        PROBE_STATUS
            .with_label_values(&[probe])
            .set(status_value(status));
        PROBE_DURATION
            .with_label_values(&[probe])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_teardown_failure(&self, node: &str) {
        TEARDOWN_FAILURES.with_label_values(&[node]).inc();
    }

    pub fn set_poll_attempts(&self, node: &str, attempts: u32) {
        POLL_ATTEMPTS
            .with_label_values(&[node])
            .set(i64::from(attempts));
    }

    /// Text exposition of every registered metric
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
