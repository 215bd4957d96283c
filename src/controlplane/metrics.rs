//! Driver metrics
//!
//! Operation counters and latencies, exposed on the binary's `/metrics`
//! endpoint once registered.

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;
use std::time::Duration;

static METRICS: LazyLock<DriverMetrics> = LazyLock::new(DriverMetrics::new);

/// Outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_IN_PROGRESS: &str = "in_progress";
pub const OUTCOME_ERROR: &str = "error";

/// Counters and histograms for driver operations
#[derive(Clone)]
pub struct DriverMetrics {
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl DriverMetrics {
    fn new() -> Self {
        let operations = IntCounterVec::new(
            Opts::new("anf_driver_operations_total", "Driver operations by outcome"),
            &["operation", "outcome"],
        )
        .expect("static metric definition");

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "anf_driver_operation_duration_seconds",
                "Duration of driver operations",
            )
            .buckets(vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 120.0, 300.0]),
            &["operation"],
        )
        .expect("static metric definition");

        Self {
            operations,
            duration,
        }
    }

    /// Process-wide instance
    pub fn global() -> &'static DriverMetrics {
        &METRICS
    }

    /// Expose the metrics through `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry
            .register(Box::new(self.operations.clone()))
            .and_then(|_| registry.register(Box::new(self.duration.clone())))
            .map_err(|e| Error::Internal(format!("failed to register driver metrics: {}", e)))
    }

    pub fn record(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }
}
