use crate::error::{SdkError, SdkResult};
use crate::export::{ExportBatch, ExportError, ExportResult, Exporter};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An exporter that keeps every batch it receives in memory.
///
/// Useful for tests and debugging. Clones share the same storage, so a clone
/// can be handed to a provider while the original is kept for assertions.
///
/// ```
/// use beacon_sdk::export::InMemoryExporter;
/// use beacon_sdk::metrics::Registry;
///
/// let exporter = InMemoryExporter::default();
/// let registry = Registry::builder().with_exporter(exporter.clone()).build();
/// let counter = registry.counter("jobs_total").build().unwrap();
/// counter.add(2.0, &[]).unwrap();
/// registry.force_flush().unwrap();
///
/// let records = exporter.get_finished_records().unwrap();
/// assert_eq!(records[0].value(), 2.0);
/// # registry.shutdown().unwrap();
/// ```
pub struct InMemoryExporter<R> {
    batches: Arc<Mutex<Vec<ExportBatch<R>>>>,
    export_calls: Arc<AtomicUsize>,
    shutdown_called: Arc<AtomicBool>,
}

impl<R> Clone for InMemoryExporter<R> {
    fn clone(&self) -> Self {
        InMemoryExporter {
            batches: Arc::clone(&self.batches),
            export_calls: Arc::clone(&self.export_calls),
            shutdown_called: Arc::clone(&self.shutdown_called),
        }
    }
}

impl<R> Default for InMemoryExporter<R> {
    fn default() -> Self {
        InMemoryExporter {
            batches: Arc::new(Mutex::new(Vec::new())),
            export_calls: Arc::new(AtomicUsize::new(0)),
            shutdown_called: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<R> fmt::Debug for InMemoryExporter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryExporter")
            .field("export_calls", &self.export_calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R: Clone> InMemoryExporter<R> {
    /// Returns a copy of every batch received so far, in export order.
    pub fn get_finished_batches(&self) -> Result<Vec<ExportBatch<R>>, SdkError> {
        Ok(self.batches.lock()?.clone())
    }

    /// Returns every record received so far, flattened across batches.
    pub fn get_finished_records(&self) -> Result<Vec<R>, SdkError> {
        Ok(self
            .batches
            .lock()?
            .iter()
            .flat_map(|batch| batch.records().iter().cloned())
            .collect())
    }
}

impl<R> InMemoryExporter<R> {
    /// Number of times `export` has been called.
    pub fn export_calls(&self) -> usize {
        self.export_calls.load(Ordering::SeqCst)
    }

    /// Returns `true` once the owning processor has shut the exporter down.
    pub fn is_shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::SeqCst)
    }

    /// Forgets every stored batch.
    pub fn reset(&self) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
        self.export_calls.store(0, Ordering::SeqCst);
    }
}

impl<R> Exporter<R> for InMemoryExporter<R>
where
    R: Clone + Send + Sync + 'static,
{
    #[allow(clippy::manual_async_fn)]
    fn export(&self, batch: &ExportBatch<R>) -> impl Future<Output = ExportResult> + Send {
        async move {
            self.export_calls.fetch_add(1, Ordering::SeqCst);
            self.batches
                .lock()
                .map(|mut batches| batches.push(batch.clone()))
                .map_err(|err| ExportError::Permanent(format!("storage poisoned: {err}")))
        }
    }

    fn shutdown(&self) -> SdkResult {
        self.shutdown_called.store(true, Ordering::SeqCst);
        Ok(())
    }
}
