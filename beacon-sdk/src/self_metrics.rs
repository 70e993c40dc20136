//! Counters the pipeline keeps about itself.
//!
//! Export failures and dropped records never surface as errors to application
//! code. These counters are the only place an operator can see them. Both
//! providers expose them as snapshots, and the metrics registry also exports
//! the loss counters as counter records at each tick, so they reach the
//! collector next to application metrics. The logs pipeline keeps them as
//! snapshots only, since a log batch has no place for a measurement.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Records lost to buffer overflow, shutdown deadlines or recording after shutdown.
pub const DROPPED_RECORDS_TOTAL: &str = "telemetry_dropped_records_total";
/// Batches dropped after the exporter failed permanently or retries ran out.
pub const EXPORT_FAILURES_TOTAL: &str = "telemetry_export_failures_total";
/// Observable gauge callbacks that timed out or panicked.
pub const CALLBACK_FAILURES_TOTAL: &str = "telemetry_callback_failures_total";
/// Records acknowledged by the exporter.
pub const EXPORTED_RECORDS_TOTAL: &str = "telemetry_exported_records_total";

/// Live counters shared between a processor, its buffer's producers and its owner.
#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    dropped_records: AtomicU64,
    export_failures: AtomicU64,
    callback_failures: AtomicU64,
    exported_records: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn record_dropped(&self, count: u64) {
        self.dropped_records.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exported(&self, count: u64) {
        self.exported_records.fetch_add(count, Ordering::Relaxed);
    }

    /// `buffer_dropped` is added on top because overflow evictions are counted
    /// by the buffer itself on the hot path.
    pub(crate) fn snapshot(&self, buffer_dropped: u64) -> SelfMetrics {
        SelfMetrics {
            dropped_records_total: self.dropped_records.load(Ordering::Relaxed) + buffer_dropped,
            export_failures_total: self.export_failures.load(Ordering::Relaxed),
            callback_failures_total: self.callback_failures.load(Ordering::Relaxed),
            exported_records_total: self.exported_records.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the pipeline's own counters.
///
/// All values are cumulative since the provider was built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SelfMetrics {
    /// See [`DROPPED_RECORDS_TOTAL`].
    pub dropped_records_total: u64,
    /// See [`EXPORT_FAILURES_TOTAL`].
    pub export_failures_total: u64,
    /// See [`CALLBACK_FAILURES_TOTAL`].
    pub callback_failures_total: u64,
    /// See [`EXPORTED_RECORDS_TOTAL`].
    pub exported_records_total: u64,
}

impl SelfMetrics {
    /// Iterates the counters as `(metric name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> {
        [
            (DROPPED_RECORDS_TOTAL, self.dropped_records_total),
            (EXPORT_FAILURES_TOTAL, self.export_failures_total),
            (CALLBACK_FAILURES_TOTAL, self.callback_failures_total),
            (EXPORTED_RECORDS_TOTAL, self.exported_records_total),
        ]
        .into_iter()
    }
}
