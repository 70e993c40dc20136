use crate::attributes::{AttributeSet, KeyValue};
use crate::metrics::observable::{Observation, ObserverSet};
use crate::metrics::{InstrumentDescriptor, InstrumentKind, MeasurementRecord, MetricError};
use crate::processor::BatchProcessor;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// The latest value written to one gauge series.
#[derive(Clone, Copy, Debug)]
struct GaugePoint {
    value: f64,
    timestamp: SystemTime,
}

/// State shared by every clone of one instrument handle.
pub(crate) struct InstrumentCore {
    descriptor: Arc<InstrumentDescriptor>,
    processor: Arc<BatchProcessor<MeasurementRecord>>,
    // Only set for observable instruments.
    observers: Option<Arc<ObserverSet>>,
    // Only set for gauges. Held while a `set` stamps and submits its record,
    // so per series the buffer order, the timestamps and the stored value all
    // follow completion order.
    gauge_series: Option<Mutex<HashMap<AttributeSet, GaugePoint>>>,
}

impl InstrumentCore {
    pub(crate) fn new(
        descriptor: Arc<InstrumentDescriptor>,
        processor: Arc<BatchProcessor<MeasurementRecord>>,
        observers: Option<Arc<ObserverSet>>,
    ) -> Self {
        let gauge_series =
            (descriptor.kind() == InstrumentKind::Gauge).then(|| Mutex::new(HashMap::new()));
        InstrumentCore {
            descriptor,
            processor,
            observers,
            gauge_series,
        }
    }

    fn invalid_value(&self, value: f64) -> MetricError {
        MetricError::InvalidValue {
            instrument: self.descriptor.name_cow(),
            value,
        }
    }

    fn record(&self, value: f64, attributes: &[KeyValue]) {
        self.processor.submit(MeasurementRecord::new(
            self.descriptor.clone(),
            attributes.into(),
            value,
            SystemTime::now(),
        ));
    }

    fn record_gauge(
        &self,
        series: &Mutex<HashMap<AttributeSet, GaugePoint>>,
        value: f64,
        attributes: &[KeyValue],
    ) -> Result<(), MetricError> {
        let attributes = AttributeSet::from(attributes);
        let mut series = series.lock()?;
        let now = SystemTime::now();
        // A wall clock stepping backwards must not reorder the series.
        let timestamp = match series.get(&attributes) {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        series.insert(attributes.clone(), GaugePoint { value, timestamp });
        self.processor.submit(MeasurementRecord::new(
            self.descriptor.clone(),
            attributes,
            value,
            timestamp,
        ));
        Ok(())
    }
}

macro_rules! instrument_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(pub(crate) Arc<InstrumentCore>);

        impl $name {
            /// Describes this instrument.
            pub fn descriptor(&self) -> &InstrumentDescriptor {
                &self.0.descriptor
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.0.descriptor.name())
                    .finish()
            }
        }
    };
}

instrument_handle!(
    /// An instrument that records monotonically increasing deltas.
    ///
    /// Every successful [`add`](Counter::add) appends one record; records are
    /// not pre-aggregated, so the sum of exported deltas equals the sum added.
    Counter
);

impl Counter {
    /// Records `delta`, which must be finite and `>= 0`.
    pub fn add(&self, delta: f64, attributes: &[KeyValue]) -> Result<(), MetricError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(self.0.invalid_value(delta));
        }
        self.0.record(delta, attributes);
        Ok(())
    }
}

instrument_handle!(
    /// An instrument that records individual observations of a distribution.
    Histogram
);

impl Histogram {
    /// Records one observation, which must be finite.
    pub fn record(&self, value: f64, attributes: &[KeyValue]) -> Result<(), MetricError> {
        if !value.is_finite() {
            return Err(self.0.invalid_value(value));
        }
        self.0.record(value, attributes);
        Ok(())
    }
}

instrument_handle!(
    /// An instrument whose value is set directly by application code.
    ///
    /// Each [`set`](Gauge::set) emits exactly one record. When several threads
    /// set the same series concurrently, the last call to complete wins: its
    /// record is buffered last and carries the latest timestamp of the
    /// series, and [`last_value`](Gauge::last_value) returns it.
    Gauge
);

impl Gauge {
    /// Sets the current value, which must be finite.
    pub fn set(&self, value: f64, attributes: &[KeyValue]) -> Result<(), MetricError> {
        if !value.is_finite() {
            return Err(self.0.invalid_value(value));
        }
        match &self.0.gauge_series {
            Some(series) => self.0.record_gauge(series, value, attributes),
            None => Err(MetricError::Internal(
                "gauge is not attached to a registry".into(),
            )),
        }
    }

    /// The value of the last completed [`set`](Gauge::set) for the series
    /// identified by `attributes`, if any.
    pub fn last_value(&self, attributes: &[KeyValue]) -> Option<f64> {
        let series = self.0.gauge_series.as_ref()?.lock().ok()?;
        series
            .get(&AttributeSet::from(attributes))
            .map(|point| point.value)
    }
}

instrument_handle!(
    /// An instrument whose values are reported by callbacks.
    ///
    /// Callbacks run on the batch processor's thread at every export tick
    /// (timer, force-flush and shutdown), never on the caller's thread.
    ObservableGauge
);

impl ObservableGauge {
    /// Registers `callback`, invoked once per export tick.
    ///
    /// Every callback of the registry shares one timeout per tick. If the
    /// callback overruns it or panics, its observations for that tick are
    /// skipped and the failure is counted. Non-finite observations are
    /// skipped.
    pub fn register_callback<F>(&self, callback: F) -> Result<(), MetricError>
    where
        F: Fn() -> Vec<Observation> + Send + Sync + 'static,
    {
        match &self.0.observers {
            Some(observers) => observers.register(self.0.descriptor.clone(), Arc::new(callback)),
            None => Err(MetricError::Internal(
                "observable gauge is not attached to a registry".into(),
            )),
        }
    }
}

/// A handle to an instrument of any kind, as returned by
/// [`Registry::get_or_create`](crate::metrics::Registry::get_or_create).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstrumentHandle {
    /// A [`Counter`].
    Counter(Counter),
    /// A [`Histogram`].
    Histogram(Histogram),
    /// A [`Gauge`].
    Gauge(Gauge),
    /// An [`ObservableGauge`].
    ObservableGauge(ObservableGauge),
}

impl InstrumentHandle {
    /// The kind of the underlying instrument.
    pub fn kind(&self) -> InstrumentKind {
        self.descriptor().kind()
    }

    /// Describes the underlying instrument.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        match self {
            InstrumentHandle::Counter(i) => i.descriptor(),
            InstrumentHandle::Histogram(i) => i.descriptor(),
            InstrumentHandle::Gauge(i) => i.descriptor(),
            InstrumentHandle::ObservableGauge(i) => i.descriptor(),
        }
    }

    /// Returns `true` if both handles refer to the very same instrument.
    pub fn same_instrument(&self, other: &InstrumentHandle) -> bool {
        self == other
    }
}
