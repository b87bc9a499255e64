//! Prometheus metrics collection.
//!
//! Operational counters for the assignment path, exposed at `/metrics`.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Assignment labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AssignmentLabels {
    pub experiment: String,
    pub variant: String,
    pub source: String,
}

/// Store operation labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StoreLabels {
    pub operation: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// Resolved assignments by experiment/variant/source.
    pub assignments: Family<AssignmentLabels, Counter>,

    /// Store failures (errors and timeouts) by operation.
    pub store_errors: Family<StoreLabels, Counter>,

    /// Store call duration by operation.
    pub store_duration_seconds: Family<StoreLabels, Histogram>,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let assignments = Family::<AssignmentLabels, Counter>::default();
        registry.register(
            "experiment_assignments",
            "Experiment variants resolved for requests",
            assignments.clone(),
        );

        let store_errors = Family::<StoreLabels, Counter>::default();
        registry.register(
            "experiment_store_errors",
            "Assignment store failures and timeouts",
            store_errors.clone(),
        );

        let store_duration_seconds = Family::<StoreLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.0001, 2.0, 14))
        });
        registry.register(
            "experiment_store_duration_seconds",
            "Assignment store call duration in seconds",
            store_duration_seconds.clone(),
        );

        Self {
            registry,
            assignments,
            store_errors,
            store_duration_seconds,
        }
    }

    /// Record one resolved assignment.
    pub fn record_assignment(&self, experiment: &str, variant: &str, source: &str) {
        self.assignments
            .get_or_create(&AssignmentLabels {
                experiment: experiment.to_string(),
                variant: variant.to_string(),
                source: source.to_string(),
            })
            .inc();
    }

    /// Record a failed store call.
    pub fn record_store_error(&self, operation: &str) {
        self.store_errors
            .get_or_create(&StoreLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    /// Record a store call duration.
    pub fn record_store_call(&self, operation: &str, duration_secs: f64) {
        self.store_duration_seconds
            .get_or_create(&StoreLabels {
                operation: operation.to_string(),
            })
            .observe(duration_secs);
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}
