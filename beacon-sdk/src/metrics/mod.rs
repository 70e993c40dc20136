//! The metrics signal.
//!
//! Instruments are obtained from a [`Registry`], which owns the pipeline they
//! write to. Four kinds are supported:
//!
//! * [`Counter`]: monotonic deltas, one record per `add`.
//! * [`Histogram`]: individual observations, one record per `record`.
//! * [`Gauge`]: values set directly, one record per `set`.
//! * [`ObservableGauge`]: values reported by callbacks at each export tick.
//!
//! Measurements are not aggregated in process. Each call produces one
//! [`MeasurementRecord`] that is buffered, batched and handed to the exporter;
//! aggregation is left to the collector.
//!
//! The registry also exports its own loss counters
//! (`telemetry_dropped_records_total`, `telemetry_export_failures_total` and
//! `telemetry_callback_failures_total`) as counter records whenever they grow.
//! Those names are reserved as counters.
//!
//! ```
//! use beacon_sdk::metrics::{Observation, Registry};
//! use beacon_sdk::KeyValue;
//!
//! let registry = Registry::builder().build();
//!
//! let requests = registry
//!     .counter("http_requests_total")
//!     .with_description("Requests served")
//!     .build()
//!     .unwrap();
//! requests.add(1.0, &[KeyValue::new("status", 200_i64)]).unwrap();
//!
//! let open_files = registry.observable_gauge("open_files").build().unwrap();
//! open_files
//!     .register_callback(|| vec![Observation::new(12.0, &[])])
//!     .unwrap();
//! # registry.shutdown().unwrap();
//! ```
mod error;
mod handle;
mod instrument;
mod observable;
mod record;
mod registry;
mod self_report;

pub use error::MetricError;
pub use handle::{Counter, Gauge, Histogram, InstrumentHandle, ObservableGauge};
pub use instrument::{InstrumentDescriptor, InstrumentKind};
pub use observable::{Observation, DEFAULT_CALLBACK_TIMEOUT};
pub use record::MeasurementRecord;
pub use registry::{InstrumentBuilder, Registry, RegistryBuilder};
