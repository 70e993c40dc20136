use crate::config::{ConfigError, PipelineConfig};
use crate::error::{SdkError, SdkResult};
use crate::export::{Exporter, NoopExporter};
use crate::logs::LogRecord;
use crate::processor::{BatchConfig, BatchProcessor, ProcessorState};
use crate::self_metrics::{PipelineStats, SelfMetrics};
use crate::suppression::SuppressionContext;
use crate::Resource;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Owns the logs pipeline and hands out [`Logger`]s.
///
/// Log records go through the same bounded buffer and batch processor as
/// metrics: emitting never blocks, overflow drops the oldest record, and
/// export happens on the processor's thread. Clones share the pipeline; when
/// the last clone and every logger are dropped, the provider shuts down.
///
/// ```
/// use beacon_sdk::logs::{LogRecord, LoggerProvider, Severity};
///
/// let provider = LoggerProvider::builder().build();
/// let logger = provider.logger("checkout");
/// logger.emit(LogRecord::new(Severity::Info, "order placed"));
/// provider.shutdown().unwrap();
/// ```
#[derive(Clone)]
pub struct LoggerProvider {
    inner: Arc<LoggerProviderInner>,
}

struct LoggerProviderInner {
    resource: Resource,
    processor: BatchProcessor<LogRecord>,
    is_shutdown: AtomicBool,
}

impl LoggerProviderInner {
    fn shutdown(&self) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(SdkError::AlreadyShutdown);
        }
        self.processor.shutdown()
    }
}

impl Drop for LoggerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            beacon_info!(
                name: "LoggerProvider.Drop.InvokingShutdown",
                message = "Last reference of LoggerProvider dropped, initiating shutdown."
            );
            if let Err(err) = self.shutdown() {
                beacon_error!(name: "LoggerProvider.Drop.ShutdownFailed", error = err.to_string());
            }
        } else {
            beacon_debug!(name: "LoggerProvider.Drop.AlreadyShutdown");
        }
    }
}

impl fmt::Debug for LoggerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerProvider")
            .field("resource", &self.inner.resource)
            .field("processor", &self.inner.processor)
            .finish()
    }
}

impl LoggerProvider {
    /// Create a new provider builder. Without an exporter, records are
    /// discarded by a [`NoopExporter`].
    pub fn builder() -> LoggerProviderBuilder<NoopExporter> {
        LoggerProviderBuilder {
            resource: None,
            exporter: NoopExporter::new(),
            batch_config: None,
        }
    }

    /// Builds a provider exporting with the exporter, batching options and
    /// resource described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<LoggerProvider, ConfigError> {
        Ok(LoggerProvider::builder()
            .with_resource(config.resource())
            .with_exporter(config.logs_exporter()?)
            .with_batch_config(config.batch_config())
            .build())
    }

    /// Returns a logger whose records default to `name` as their target.
    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> Logger {
        Logger {
            name: name.into(),
            provider: self.clone(),
        }
    }

    /// The resource attached to every exported batch.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Exports everything buffered, waiting for the exporter.
    pub fn force_flush(&self) -> SdkResult {
        self.inner.processor.force_flush()
    }

    /// Flushes and stops the pipeline. A second call returns
    /// [`SdkError::AlreadyShutdown`].
    pub fn shutdown(&self) -> SdkResult {
        self.inner.shutdown()
    }

    /// Snapshot of the pipeline's own counters.
    pub fn self_metrics(&self) -> SelfMetrics {
        self.inner.processor.self_metrics()
    }

    /// Lifecycle phase of the batch processor.
    pub fn processor_state(&self) -> ProcessorState {
        self.inner.processor.state()
    }
}

/// Configuration for a [`LoggerProvider`].
#[derive(Debug)]
pub struct LoggerProviderBuilder<E> {
    resource: Option<Resource>,
    exporter: E,
    batch_config: Option<BatchConfig>,
}

impl<E> LoggerProviderBuilder<E> {
    /// Associates a [Resource] with the provider. Defaults to
    /// [`Resource::builder().build()`](Resource::builder).
    pub fn with_resource(self, resource: Resource) -> Self {
        LoggerProviderBuilder {
            resource: Some(resource),
            ..self
        }
    }

    /// Sets the exporter batches are handed to.
    pub fn with_exporter<T: Exporter<LogRecord>>(self, exporter: T) -> LoggerProviderBuilder<T> {
        LoggerProviderBuilder {
            resource: self.resource,
            exporter,
            batch_config: self.batch_config,
        }
    }

    /// Sets the batching configuration. Defaults to [`BatchConfig::default`].
    pub fn with_batch_config(self, batch_config: BatchConfig) -> Self {
        LoggerProviderBuilder {
            batch_config: Some(batch_config),
            ..self
        }
    }
}

impl<E: Exporter<LogRecord>> LoggerProviderBuilder<E> {
    /// Creates the provider and starts its batch processor thread.
    pub fn build(self) -> LoggerProvider {
        let resource = self
            .resource
            .unwrap_or_else(|| Resource::builder().build());
        let processor = BatchProcessor::new(
            self.exporter,
            resource.clone(),
            self.batch_config.unwrap_or_default(),
            Arc::new(PipelineStats::default()),
            None,
            None,
        );
        LoggerProvider {
            inner: Arc::new(LoggerProviderInner {
                resource,
                processor,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

/// Emits [`LogRecord`]s into a provider's pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    name: Cow<'static, str>,
    provider: LoggerProvider,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}

impl Logger {
    /// The name given to [`LoggerProvider::logger`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `record` to the buffer. Never blocks.
    ///
    /// Records emitted from the pipeline's own threads are discarded.
    pub fn emit(&self, mut record: LogRecord) {
        if SuppressionContext::is_suppressed() {
            return;
        }
        let now = SystemTime::now();
        record.observed_timestamp = Some(now);
        if record.timestamp.is_none() {
            record.timestamp = Some(now);
        }
        if record.target.is_none() {
            record.target = Some(self.name.clone());
        }
        self.provider.inner.processor.submit(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemoryExporter;
    use crate::logs::Severity;
    use crate::processor::BatchConfigBuilder;
    use std::time::Duration;

    fn test_provider() -> (LoggerProvider, InMemoryExporter<LogRecord>) {
        let exporter = InMemoryExporter::default();
        let provider = LoggerProvider::builder()
            .with_resource(Resource::builder_empty().with_service_name("logs-test").build())
            .with_exporter(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .with_max_queue_size(8)
                    .with_high_water_mark(usize::MAX)
                    .build(),
            )
            .build();
        (provider, exporter)
    }

    #[test]
    fn emit_fills_in_defaults() {
        let (provider, exporter) = test_provider();
        let logger = provider.logger("checkout");
        assert_eq!(logger.name(), "checkout");
        logger.emit(LogRecord::new(Severity::Error, "payment declined"));
        logger.emit(
            LogRecord::new(Severity::Debug, "cache miss")
                .with_target("checkout::cache")
                .with_timestamp(SystemTime::UNIX_EPOCH),
        );

        provider.force_flush().unwrap();
        let records = exporter.get_finished_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target(), Some("checkout"));
        assert_eq!(records[0].timestamp(), records[0].observed_timestamp());
        assert_eq!(records[1].target(), Some("checkout::cache"));
        assert_eq!(records[1].timestamp(), Some(SystemTime::UNIX_EPOCH));
        assert!(records[1].observed_timestamp().is_some());

        let batch = &exporter.get_finished_batches().unwrap()[0];
        assert_eq!(batch.resource().service_name().as_deref(), Some("logs-test"));
        provider.shutdown().unwrap();
    }

    #[test]
    fn overflow_drops_oldest_logs() {
        let (provider, exporter) = test_provider();
        let logger = provider.logger("flood");
        for i in 0..10 {
            logger.emit(LogRecord::new(Severity::Info, format!("line {i}")));
        }
        provider.shutdown().unwrap();

        let bodies: Vec<String> = exporter
            .get_finished_records()
            .unwrap()
            .iter()
            .filter_map(|r| r.body().map(str::to_string))
            .collect();
        assert_eq!(bodies.len(), 8);
        assert_eq!(bodies[0], "line 2");
        assert_eq!(provider.self_metrics().dropped_records_total, 2);
    }

    #[test]
    fn suppressed_thread_emits_nothing() {
        let (provider, exporter) = test_provider();
        let logger = provider.logger("internal");
        {
            let _guard = SuppressionContext::attach();
            logger.emit(LogRecord::new(Severity::Warn, "from inside the pipeline"));
        }
        logger.emit(LogRecord::new(Severity::Warn, "from the application"));
        provider.force_flush().unwrap();
        assert_eq!(exporter.get_finished_records().unwrap().len(), 1);
        provider.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent_and_later_logs_are_counted() {
        let (provider, _) = test_provider();
        let logger = provider.logger("late");
        provider.shutdown().unwrap();
        assert!(matches!(provider.shutdown(), Err(SdkError::AlreadyShutdown)));
        logger.emit(LogRecord::new(Severity::Info, "too late"));
        assert_eq!(provider.self_metrics().dropped_records_total, 1);
    }

    #[test]
    fn dropping_provider_and_loggers_flushes() {
        let (provider, exporter) = test_provider();
        let logger = provider.logger("last");
        drop(provider);
        logger.emit(LogRecord::new(Severity::Info, "still delivered"));
        drop(logger);
        assert_eq!(exporter.get_finished_records().unwrap().len(), 1);
        assert!(exporter.is_shutdown_called());
    }
}
