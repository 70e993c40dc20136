use crate::buffer::MeasurementBuffer;
use crate::config::{ConfigError, PipelineConfig};
use crate::error::SdkResult;
use crate::export::{Exporter, NoopExporter};
use crate::metrics::handle::InstrumentCore;
use crate::metrics::observable::{ObserverSet, DEFAULT_CALLBACK_TIMEOUT};
use crate::metrics::self_report::SelfMetricsReporter;
use crate::metrics::{
    Counter, Gauge, Histogram, InstrumentDescriptor, InstrumentHandle, InstrumentKind,
    MeasurementRecord, MetricError, ObservableGauge,
};
use crate::processor::{BatchConfig, BatchProcessor, ProcessorState};
use crate::self_metrics::{PipelineStats, SelfMetrics};
use crate::Resource;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Creates and deduplicates instruments, and owns the pipeline behind them.
///
/// A `Registry` is constructed once at startup and passed by reference, or
/// cloned, to every component that records metrics. All clones share the same
/// instruments, buffer and batch processor. When the last clone is dropped the
/// registry shuts down, flushing what is buffered.
///
/// ```
/// use beacon_sdk::export::InMemoryExporter;
/// use beacon_sdk::metrics::Registry;
/// use beacon_sdk::KeyValue;
///
/// let exporter = InMemoryExporter::default();
/// let registry = Registry::builder().with_exporter(exporter.clone()).build();
///
/// let latency = registry
///     .histogram("http_request_duration_seconds")
///     .with_unit("s")
///     .build()
///     .unwrap();
/// latency.record(0.042, &[KeyValue::new("route", "/cart")]).unwrap();
///
/// registry.shutdown().unwrap();
/// assert_eq!(exporter.get_finished_records().unwrap()[0].value(), 0.042);
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    resource: Resource,
    processor: Arc<BatchProcessor<MeasurementRecord>>,
    observers: Arc<ObserverSet>,
    instruments: Mutex<HashMap<Cow<'static, str>, InstrumentHandle>>,
    is_shutdown: AtomicBool,
}

impl RegistryInner {
    fn shutdown(&self) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(crate::error::SdkError::AlreadyShutdown);
        }
        self.processor.shutdown()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            beacon_debug!(
                name: "Registry.Drop.AlreadyShutdown",
                message = "Registry was already shut down; drop will not attempt shutdown again."
            );
        } else {
            beacon_info!(
                name: "Registry.Drop.InvokingShutdown",
                message = "Last reference of Registry dropped, initiating shutdown."
            );
            if let Err(err) = self.shutdown() {
                beacon_error!(name: "Registry.Drop.ShutdownFailed", error = err.to_string());
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("resource", &self.inner.resource)
            .field("processor", &self.inner.processor)
            .field("observers", &self.inner.observers)
            .finish()
    }
}

impl Registry {
    /// Create a new registry builder. Without an exporter, records are
    /// discarded by a [`NoopExporter`].
    pub fn builder() -> RegistryBuilder<NoopExporter> {
        RegistryBuilder {
            resource: None,
            exporter: NoopExporter::new(),
            batch_config: None,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Builds a registry exporting with the exporter, batching options and
    /// resource described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Registry, ConfigError> {
        Ok(Registry::builder()
            .with_resource(config.resource())
            .with_exporter(config.metrics_exporter()?)
            .with_batch_config(config.batch_config())
            .with_callback_timeout(config.callback_timeout())
            .build())
    }

    /// Returns the instrument registered under `descriptor`'s name, creating
    /// it on first use.
    ///
    /// Calls with the same name and kind return the identical handle. A call
    /// with the same name and another kind fails with
    /// [`MetricError::ConflictingInstrumentKind`]. A differing unit or
    /// description is ignored with a warning: the first registration wins.
    pub fn get_or_create(
        &self,
        descriptor: InstrumentDescriptor,
    ) -> Result<InstrumentHandle, MetricError> {
        descriptor.validate()?;

        let mut instruments = self.inner.instruments.lock()?;
        if let Some(existing) = instruments.get(descriptor.name()) {
            if existing.kind() != descriptor.kind() {
                return Err(MetricError::ConflictingInstrumentKind {
                    name: descriptor.name_cow(),
                    existing: existing.kind(),
                    requested: descriptor.kind(),
                });
            }
            if existing.descriptor() != &descriptor {
                beacon_warn!(
                    name: "Registry.DuplicateInstrument",
                    instrument = descriptor.name().to_string(),
                    message = "Instrument re-registered with a different unit or description. The first registration is kept."
                );
            }
            return Ok(existing.clone());
        }

        let name = descriptor.name_cow();
        let kind = descriptor.kind();
        let observers = (kind == InstrumentKind::ObservableGauge).then(|| self.inner.observers.clone());
        let core = Arc::new(InstrumentCore::new(
            Arc::new(descriptor),
            self.inner.processor.clone(),
            observers,
        ));
        let handle = match kind {
            InstrumentKind::Counter => InstrumentHandle::Counter(Counter(core)),
            InstrumentKind::Histogram => InstrumentHandle::Histogram(Histogram(core)),
            InstrumentKind::Gauge => InstrumentHandle::Gauge(Gauge(core)),
            InstrumentKind::ObservableGauge => {
                InstrumentHandle::ObservableGauge(ObservableGauge(core))
            }
        };
        beacon_debug!(name: "Registry.InstrumentCreated", instrument = name.to_string());
        instruments.insert(name, handle.clone());
        Ok(handle)
    }

    /// Start building a [`Counter`].
    pub fn counter(&self, name: impl Into<Cow<'static, str>>) -> InstrumentBuilder<'_, Counter> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Start building a [`Histogram`].
    pub fn histogram(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, Histogram> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Start building a [`Gauge`].
    pub fn gauge(&self, name: impl Into<Cow<'static, str>>) -> InstrumentBuilder<'_, Gauge> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Start building an [`ObservableGauge`].
    pub fn observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, ObservableGauge> {
        InstrumentBuilder::new(self, name.into())
    }

    /// The resource attached to every exported batch.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Runs the observable callbacks and exports everything buffered, waiting
    /// for the exporter.
    pub fn force_flush(&self) -> SdkResult {
        self.inner.processor.force_flush()
    }

    /// Flushes and stops the pipeline. Later recordings are counted as
    /// dropped. A second call returns
    /// [`SdkError::AlreadyShutdown`](crate::error::SdkError::AlreadyShutdown).
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

/// Configuration for a [`Registry`].
pub struct RegistryBuilder<E> {
    resource: Option<Resource>,
    exporter: E,
    batch_config: Option<BatchConfig>,
    callback_timeout: Duration,
}

impl<E: fmt::Debug> fmt::Debug for RegistryBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("resource", &self.resource)
            .field("exporter", &self.exporter)
            .field("batch_config", &self.batch_config)
            .field("callback_timeout", &self.callback_timeout)
            .finish()
    }
}

impl<E> RegistryBuilder<E> {
    /// Associates a [Resource] with the registry. Defaults to
    /// [`Resource::builder().build()`](Resource::builder).
    pub fn with_resource(self, resource: Resource) -> Self {
        RegistryBuilder {
            resource: Some(resource),
            ..self
        }
    }

    /// Sets the exporter batches are handed to.
    pub fn with_exporter<T>(self, exporter: T) -> RegistryBuilder<T>
    where
        T: Exporter<MeasurementRecord>,
    {
        RegistryBuilder {
            resource: self.resource,
            exporter,
            batch_config: self.batch_config,
            callback_timeout: self.callback_timeout,
        }
    }

    /// Sets the batching configuration. Defaults to [`BatchConfig::default`].
    pub fn with_batch_config(self, batch_config: BatchConfig) -> Self {
        RegistryBuilder {
            batch_config: Some(batch_config),
            ..self
        }
    }

    /// Sets the budget shared by all observable callbacks at each tick.
    /// Defaults to 1 second.
    pub fn with_callback_timeout(self, callback_timeout: Duration) -> Self {
        RegistryBuilder {
            callback_timeout,
            ..self
        }
    }
}

impl<E> RegistryBuilder<E>
where
    E: Exporter<MeasurementRecord>,
{
    /// Creates the registry and starts its batch processor thread.
    pub fn build(self) -> Registry {
        let resource = self
            .resource
            .unwrap_or_else(|| Resource::builder().build());
        let stats = Arc::new(PipelineStats::default());
        let observers = Arc::new(ObserverSet::new(self.callback_timeout, stats.clone()));
        let tick_observers = observers.clone();
        let mut reporter = SelfMetricsReporter::new();
        let reserved = reporter.descriptors();
        let processor = Arc::new(BatchProcessor::new(
            self.exporter,
            resource.clone(),
            self.batch_config.unwrap_or_default(),
            stats,
            Some(Box::new(
                move |buffer: &MeasurementBuffer<MeasurementRecord>| tick_observers.collect(buffer),
            )),
            Some(Box::new(move |metrics: SelfMetrics| reporter.report(metrics))),
        ));

        let instruments = reserved
            .into_iter()
            .map(|descriptor| {
                let name = descriptor.name_cow();
                let core = InstrumentCore::new(descriptor, processor.clone(), None);
                (name, InstrumentHandle::Counter(Counter(Arc::new(core))))
            })
            .collect();

        beacon_debug!(name: "Registry.Built");
        Registry {
            inner: Arc::new(RegistryInner {
                resource,
                processor,
                observers,
                instruments: Mutex::new(instruments),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

/// Configures one instrument before registering it with
/// [`Registry::get_or_create`].
pub struct InstrumentBuilder<'a, T> {
    registry: &'a Registry,
    name: Cow<'static, str>,
    unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    _marker: PhantomData<T>,
}

impl<T> fmt::Debug for InstrumentBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentBuilder")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("description", &self.description)
            .finish()
    }
}

impl<'a, T> InstrumentBuilder<'a, T> {
    fn new(registry: &'a Registry, name: Cow<'static, str>) -> Self {
        InstrumentBuilder {
            registry,
            name,
            unit: None,
            description: None,
            _marker: PhantomData,
        }
    }

    /// Set the unit for this instrument.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the description for this instrument.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn register(self, kind: InstrumentKind) -> Result<InstrumentHandle, MetricError> {
        let mut descriptor = InstrumentDescriptor::new(self.name, kind);
        if let Some(unit) = self.unit {
            descriptor = descriptor.with_unit(unit);
        }
        if let Some(description) = self.description {
            descriptor = descriptor.with_description(description);
        }
        self.registry.get_or_create(descriptor)
    }
}

macro_rules! build_instrument {
    ($ty:ident, $kind:ident) => {
        impl InstrumentBuilder<'_, $ty> {
            #[doc = concat!("Registers the [`", stringify!($ty), "`], or returns the existing one.")]
            pub fn build(self) -> Result<$ty, MetricError> {
                match self.register(InstrumentKind::$kind)? {
                    InstrumentHandle::$kind(instrument) => Ok(instrument),
                    other => Err(MetricError::Internal(format!(
                        "registry returned a {} for a {} registration",
                        other.kind(),
                        InstrumentKind::$kind
                    ))),
                }
            }
        }
    };
}

build_instrument!(Counter, Counter);
build_instrument!(Histogram, Histogram);
build_instrument!(Gauge, Gauge);
build_instrument!(ObservableGauge, ObservableGauge);
