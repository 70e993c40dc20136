use crate::error::SdkResult;
use crate::export::{ExportBatch, ExportError, ExportResult, Exporter};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Mutex;

/// Hands every batch to several exporters, one after the other.
///
/// Used to print batches to the console while they are also sent to a
/// collector. The combined result is:
///
/// - `Ok` once every exporter has acknowledged the batch;
/// - [`ExportError::Transient`] while any exporter failed transiently, so the
///   processor retries;
/// - [`ExportError::Permanent`] when every exporter is settled but at least
///   one rejected the batch.
///
/// When the processor retries a batch, only the exporters that failed
/// transiently see it again. An exporter that already acknowledged or
/// rejected it is skipped.
///
/// ```
/// use beacon_sdk::export::{FanoutExporter, InMemoryExporter};
///
/// let first = InMemoryExporter::<String>::default();
/// let second = InMemoryExporter::<String>::default();
/// let fanout = FanoutExporter::builder()
///     .with_exporter(first.clone())
///     .with_exporter(second.clone())
///     .build();
/// assert_eq!(fanout.exporters().len(), 2);
/// ```
#[derive(Debug)]
pub struct FanoutExporter<E> {
    exporters: Vec<E>,
    // Outcomes for the batch being retried, if any.
    last_batch: Mutex<Option<(u64, Vec<Outcome>)>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Pending,
    Delivered,
    Rejected(String),
}

/// Collects the exporters of a [`FanoutExporter`].
#[derive(Debug)]
pub struct FanoutExporterBuilder<E> {
    exporters: Vec<E>,
}

impl<E> Default for FanoutExporterBuilder<E> {
    fn default() -> Self {
        FanoutExporterBuilder {
            exporters: Vec::new(),
        }
    }
}

impl<E> FanoutExporterBuilder<E> {
    /// Adds an exporter. Exporters run in the order they were added.
    pub fn with_exporter(mut self, exporter: E) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Creates the fan-out exporter.
    pub fn build(self) -> FanoutExporter<E> {
        FanoutExporter {
            exporters: self.exporters,
            last_batch: Mutex::new(None),
        }
    }
}

impl<E> FanoutExporter<E> {
    /// Returns a builder with no exporters.
    pub fn builder() -> FanoutExporterBuilder<E> {
        FanoutExporterBuilder::default()
    }

    /// The exporters, in the order batches reach them.
    pub fn exporters(&self) -> &[E] {
        &self.exporters
    }

    fn outcomes_for(&self, batch_id: u64) -> Vec<Outcome> {
        match self.last_batch.lock() {
            Ok(last) => match last.as_ref() {
                Some((id, outcomes)) if *id == batch_id => outcomes.clone(),
                _ => vec![Outcome::Pending; self.exporters.len()],
            },
            Err(_) => vec![Outcome::Pending; self.exporters.len()],
        }
    }

    fn remember(&self, batch_id: u64, outcomes: Vec<Outcome>) {
        if let Ok(mut last) = self.last_batch.lock() {
            *last = Some((batch_id, outcomes));
        }
    }
}

impl<E> From<Vec<E>> for FanoutExporter<E> {
    fn from(exporters: Vec<E>) -> Self {
        FanoutExporterBuilder { exporters }.build()
    }
}

impl<R, E> Exporter<R> for FanoutExporter<E>
where
    R: Send + Sync,
    E: Exporter<R> + Debug,
{
    #[allow(clippy::manual_async_fn)]
    fn export(&self, batch: &ExportBatch<R>) -> impl Future<Output = ExportResult> + Send {
        async move {
            let mut outcomes = self.outcomes_for(batch.id());
            let mut transient = Vec::new();
            for (index, exporter) in self.exporters.iter().enumerate() {
                if outcomes[index] != Outcome::Pending {
                    continue;
                }
                match exporter.export(batch).await {
                    Ok(()) => outcomes[index] = Outcome::Delivered,
                    Err(ExportError::Permanent(reason)) => {
                        beacon_warn!(
                            name: "FanoutExporter.ExportRejected",
                            exporter_index = index,
                            reason = reason.clone()
                        );
                        outcomes[index] = Outcome::Rejected(reason);
                    }
                    Err(ExportError::Transient(reason)) => {
                        beacon_debug!(
                            name: "FanoutExporter.ExportFailed",
                            exporter_index = index,
                            reason = reason.clone()
                        );
                        transient.push(reason);
                    }
                }
            }

            let rejected: Vec<String> = outcomes
                .iter()
                .filter_map(|outcome| match outcome {
                    Outcome::Rejected(reason) => Some(reason.clone()),
                    _ => None,
                })
                .collect();
            self.remember(batch.id(), outcomes);

            if !transient.is_empty() {
                Err(ExportError::Transient(transient.join("; ")))
            } else if !rejected.is_empty() {
                Err(ExportError::Permanent(rejected.join("; ")))
            } else {
                Ok(())
            }
        }
    }

    /// Shuts every exporter down, even after one fails, and returns the
    /// first error.
    fn shutdown(&self) -> SdkResult {
        let mut result = Ok(());
        for (index, exporter) in self.exporters.iter().enumerate() {
            if let Err(err) = Exporter::<R>::shutdown(exporter) {
                beacon_warn!(
                    name: "FanoutExporter.ShutdownFailed",
                    exporter_index = index,
                    error = err.to_string()
                );
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkError;
    use crate::export::InMemoryExporter;
    use crate::Resource;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Answers with the queued results in order, then `Ok`.
    #[derive(Debug, Clone, Default)]
    struct ScriptedExporter {
        results: Arc<Mutex<VecDeque<ExportResult>>>,
        calls: Arc<AtomicUsize>,
        fail_shutdown: bool,
    }

    impl ScriptedExporter {
        fn answering(results: Vec<ExportResult>) -> Self {
            ScriptedExporter {
                results: Arc::new(Mutex::new(results.into())),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Exporter<String> for ScriptedExporter {
        #[allow(clippy::manual_async_fn)]
        fn export(&self, _batch: &ExportBatch<String>) -> impl Future<Output = ExportResult> + Send {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
            }
        }

        fn shutdown(&self) -> SdkResult {
            if self.fail_shutdown {
                Err(SdkError::InternalFailure("stuck".into()))
            } else {
                Ok(())
            }
        }
    }

    fn batch(records: &[&str]) -> ExportBatch<String> {
        ExportBatch::new(
            Resource::empty(),
            records.iter().map(|r| r.to_string()).collect(),
        )
    }

    #[test]
    fn every_exporter_sees_the_batch() {
        let console = InMemoryExporter::<String>::default();
        let collector = InMemoryExporter::<String>::default();
        let fanout = FanoutExporter::builder()
            .with_exporter(console.clone())
            .with_exporter(collector.clone())
            .build();

        futures_executor::block_on(fanout.export(&batch(&["a", "b"]))).unwrap();

        assert_eq!(console.get_finished_records().unwrap(), vec!["a", "b"]);
        assert_eq!(collector.get_finished_records().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn retry_only_reaches_exporters_that_failed_transiently() {
        let console = ScriptedExporter::default();
        let collector =
            ScriptedExporter::answering(vec![Err(ExportError::Transient("503".into()))]);
        let fanout = FanoutExporter::from(vec![console.clone(), collector.clone()]);
        let batch = batch(&["a"]);

        let first = futures_executor::block_on(fanout.export(&batch));
        assert_eq!(first, Err(ExportError::Transient("503".into())));
        let retry = futures_executor::block_on(fanout.export(&batch));
        assert_eq!(retry, Ok(()));

        assert_eq!(console.calls(), 1);
        assert_eq!(collector.calls(), 2);
    }

    #[test]
    fn rejection_is_permanent_once_the_rest_settle() {
        let rejecting =
            ScriptedExporter::answering(vec![Err(ExportError::Permanent("400".into()))]);
        let flaky = ScriptedExporter::answering(vec![Err(ExportError::Transient("503".into()))]);
        let fanout = FanoutExporter::from(vec![rejecting.clone(), flaky.clone()]);
        let batch = batch(&["a"]);

        // transient wins while anything can still succeed
        assert!(matches!(
            futures_executor::block_on(fanout.export(&batch)),
            Err(ExportError::Transient(_))
        ));
        assert_eq!(
            futures_executor::block_on(fanout.export(&batch)),
            Err(ExportError::Permanent("400".into()))
        );
        assert_eq!(rejecting.calls(), 1);
        assert_eq!(flaky.calls(), 2);
    }

    #[test]
    fn a_new_batch_starts_from_scratch() {
        let collector = ScriptedExporter::answering(vec![Err(ExportError::Permanent(
            "400".into(),
        ))]);
        let fanout = FanoutExporter::from(vec![collector.clone()]);

        assert!(futures_executor::block_on(fanout.export(&batch(&["a"]))).is_err());
        assert!(futures_executor::block_on(fanout.export(&batch(&["a"]))).is_ok());
        assert_eq!(collector.calls(), 2);
    }

    #[test]
    fn empty_fanout_acknowledges() {
        let fanout = FanoutExporter::<ScriptedExporter>::builder().build();
        assert!(futures_executor::block_on(fanout.export(&batch(&["a"]))).is_ok());
    }

    #[test]
    fn shutdown_reaches_every_exporter_and_reports_the_failure() {
        let stuck = ScriptedExporter {
            fail_shutdown: true,
            ..Default::default()
        };
        let collector = InMemoryExporter::<String>::default();
        let fanout = FanoutExporter::from(vec![stuck]);
        assert!(matches!(
            Exporter::<String>::shutdown(&fanout),
            Err(SdkError::InternalFailure(_))
        ));

        let fanout = FanoutExporter::from(vec![collector.clone(), collector.clone()]);
        assert!(Exporter::<String>::shutdown(&fanout).is_ok());
        assert!(collector.is_shutdown_called());
    }
}
