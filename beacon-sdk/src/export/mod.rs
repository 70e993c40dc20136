//! Exporters deliver batches of records to a destination.
//!
//! The [`BatchProcessor`](crate::processor::BatchProcessor) hands every batch
//! to an [`Exporter`] and interprets the result: [`ExportError::Transient`]
//! failures are retried with backoff, [`ExportError::Permanent`] failures drop
//! the batch immediately. Exporters must accept being called again with the
//! same batch after a transient failure.
//!
//! Provided exporters:
//!
//! - [`NoopExporter`] - acknowledges everything, used to disable telemetry.
//! - [`ConsoleExporter`] - writes a readable rendering to stdout.
//! - [`HttpExporter`] - POSTs the JSON-encoded batch to a collector (feature `http`).
//! - [`InMemoryExporter`] - keeps batches in memory for tests.
//! - [`ConfiguredExporter`] - one of the above, chosen at runtime.
//! - [`FanoutExporter`] - several exporters fed the same batches.
mod configured;
mod console;
mod fanout;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;
mod in_memory;
mod noop;

pub use configured::ConfiguredExporter;
pub use console::{ConsoleExporter, ConsoleExporterBuilder};
pub use fanout::{FanoutExporter, FanoutExporterBuilder};
#[cfg(feature = "http")]
pub use http::{HttpExporter, HttpExporterBuilder};
pub use in_memory::InMemoryExporter;
pub use noop::NoopExporter;

use crate::error::SdkResult;
use crate::Resource;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// A group of records exported together in one exporter call, with the
/// resource that produced them.
#[derive(Debug, Clone, Serialize)]
pub struct ExportBatch<R> {
    #[serde(skip)]
    id: u64,
    resource: Resource,
    records: Vec<R>,
}

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(0);

impl<R> ExportBatch<R> {
    pub(crate) fn new(resource: Resource, records: Vec<R>) -> Self {
        ExportBatch {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            resource,
            records,
        }
    }

    /// Identifies the batch across export attempts. Retries of a batch keep
    /// its id.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The resource describing the process that produced the records.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The records, in the order they were recorded.
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the batch, returning its records.
    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

/// Why an export attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// A failure that may go away on its own: a timeout, a connection error or
    /// a 5xx response. The processor retries these.
    #[error("transient export failure: {0}")]
    Transient(String),

    /// A failure that retrying cannot fix: a rejected or malformed batch, or an
    /// exporter that was already shut down. The batch is dropped.
    #[error("permanent export failure: {0}")]
    Permanent(String),
}

impl ExportError {
    /// Returns `true` if the processor may retry the batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::Transient(_))
    }
}

/// Nanoseconds since the Unix epoch, as written by the serializing exporters.
/// Times before the epoch are written as `0`.
pub(crate) fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// The result of one export attempt.
pub type ExportResult = Result<(), ExportError>;

/// `Exporter` defines the interface every transport implements.
///
/// `R` is the record type: [`MeasurementRecord`](crate::metrics::MeasurementRecord)
/// for metrics, [`LogRecord`](crate::logs::LogRecord) for logs.
pub trait Exporter<R>: Send + Sync + Debug + 'static {
    /// Exports a batch of records.
    ///
    /// The future is driven to completion on the processor's worker thread,
    /// never on an application thread. The same batch may be passed again
    /// after a [`ExportError::Transient`] failure.
    fn export(&self, batch: &ExportBatch<R>) -> impl Future<Output = ExportResult> + Send;

    /// Releases any resource held by the exporter. Called once by the
    /// processor after its final flush.
    fn shutdown(&self) -> SdkResult {
        Ok(())
    }
}
