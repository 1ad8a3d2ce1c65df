//! Metrics for binding operations.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

use crate::{error::BindingError, request::OperationKind};

/// Metrics for binding operations.
#[derive(Clone)]
pub struct BindingMetrics {
    /// Histogram for operation latencies.
    pub operations: Histogram<f64>,

    /// Counter for failed operations.
    pub errors: Counter<u64>,
}

impl BindingMetrics {
    /// Create new metrics from a meter.
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .f64_histogram("storage_binding_operation_duration_seconds")
            .with_description("Duration of storage binding operations in seconds")
            .build();

        let errors = meter
            .u64_counter("storage_binding_errors_total")
            .with_description("Total number of failed storage binding operations")
            .build();

        Self { operations, errors }
    }

    /// Time an operation until the returned timer is dropped.
    pub fn time(&self, binding: &str, operation: OperationKind) -> Timer {
        Timer::start_with_labels(
            &self.operations,
            &[
                KeyValue::new("binding", binding.to_string()),
                KeyValue::new("operation", operation.to_string()),
            ],
        )
    }

    pub fn record_error(&self, binding: &str, operation: OperationKind, error: &BindingError) {
        self.errors.add(
            1,
            &[
                KeyValue::new("binding", binding.to_string()),
                KeyValue::new("operation", operation.to_string()),
                KeyValue::new("kind", error.kind()),
            ],
        );
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: Vec<KeyValue>,
}

impl Timer {
    /// Start a new timer with labels.
    pub fn start_with_labels(histogram: &Histogram<f64>, labels: &[KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
            labels: labels.to_vec(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.record(duration, &self.labels);
    }
}
