//! Metrics for the Couchbase sink pipeline
//!
//! Provides Prometheus-compatible metrics for observability.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names as constants for consistency
pub mod names {
    pub const SINK_RECORDS_RECEIVED: &str = "cb_sink_records_received_total";
    pub const SINK_DOCS_WRITTEN: &str = "cb_sink_docs_written_total";
    pub const SINK_DOCS_DELETED: &str = "cb_sink_docs_deleted_total";
    pub const SINK_DUPLICATES_DISCARDED: &str = "cb_sink_duplicates_discarded_total";
    pub const SINK_FALLBACK_IDS: &str = "cb_sink_fallback_ids_total";
    pub const SINK_WRITE_FAILURES: &str = "cb_sink_write_failures_total";
    pub const SINK_BATCH_LATENCY: &str = "cb_sink_batch_latency_seconds";

    // Store metrics
    pub const STORE_REQUESTS: &str = "cb_store_requests_total";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const OPERATION: &str = "operation";
    pub const ERROR_TYPE: &str = "error_type";
    pub const STATUS: &str = "status";
}

/// Sink pipeline metrics
#[derive(Clone)]
pub struct SinkMetrics {
    component: String,
}

impl SinkMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record records received in a batch
    pub fn record_received(&self, count: u64) {
        counter!(
            names::SINK_RECORDS_RECEIVED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record documents written
    pub fn record_docs_written(&self, count: u64) {
        counter!(
            names::SINK_DOCS_WRITTEN,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record documents deleted
    pub fn record_docs_deleted(&self, count: u64) {
        counter!(
            names::SINK_DOCS_DELETED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record duplicate identities collapsed out of a batch
    pub fn record_duplicates_discarded(&self, count: u64) {
        counter!(
            names::SINK_DUPLICATES_DISCARDED,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(count);
    }

    /// Record a coordinate-fallback identity being used
    pub fn record_fallback_id(&self) {
        counter!(
            names::SINK_FALLBACK_IDS,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Record a failed write
    pub fn record_write_failure(&self, error_type: &str) {
        counter!(
            names::SINK_WRITE_FAILURES,
            labels::COMPONENT => self.component.clone(),
            labels::ERROR_TYPE => error_type.to_string(),
        )
        .increment(1);
    }

    /// Record end-to-end batch latency
    pub fn record_batch_latency(&self, duration: Duration) {
        histogram!(
            names::SINK_BATCH_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}

/// Store client metrics
#[derive(Clone)]
pub struct StoreMetrics {
    component: String,
}

impl StoreMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record one store request with its outcome
    pub fn record_request(&self, operation: &str, status: &str) {
        counter!(
            names::STORE_REQUESTS,
            labels::COMPONENT => self.component.clone(),
            labels::OPERATION => operation.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }
}
