//! # Beacon SDK
//!
//! A telemetry pipeline for applications that want to emit metrics and logs
//! without ever slowing down the code they observe.
//!
//! Application code records measurements through instruments obtained from a
//! [`Registry`](metrics::Registry). Each recording call appends one record to a
//! bounded, lock-free [`MeasurementBuffer`](buffer::MeasurementBuffer). A
//! [`BatchProcessor`](processor::BatchProcessor) running on its own thread
//! drains the buffer on a timer (or when it fills past a high-water mark),
//! splits the records into batches and hands them to an
//! [`Exporter`](export::Exporter), retrying transient failures with
//! exponential backoff.
//!
//! ```ascii
//!   +-------------+   +-------------------+   +----------------+   +------------+
//!   | Counter.add +---> MeasurementBuffer +---> BatchProcessor +---> Exporter   |
//!   +-------------+   +-------------------+   +----------------+   +------------+
//!                        (non-blocking)          (own thread)        (HTTP, ...)
//! ```
//!
//! Logs flow through the same machinery via [`LoggerProvider`](logs::LoggerProvider).
//!
//! ## Getting started
//!
//! ```no_run
//! use beacon_sdk::export::InMemoryExporter;
//! use beacon_sdk::metrics::Registry;
//! use beacon_sdk::{KeyValue, Resource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::builder()
//!     .with_resource(Resource::builder().with_service_name("checkout").build())
//!     .with_exporter(InMemoryExporter::default())
//!     .build();
//!
//! let requests = registry.counter("requests_total").build()?;
//! requests.add(1.0, &[KeyValue::new("route", "/cart")])?;
//!
//! registry.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Feature Flags
//!
//! * `http` (default): the HTTP/JSON exporter backed by a blocking `reqwest` client.
//! * `internal-logs` (default): pipeline diagnostics are emitted as `tracing` events.
//! * `tracing-bridge` (default): a `tracing_subscriber::Layer` that forwards
//!   application `tracing` events into the logs pipeline.
//! * `reqwest-rustls`: TLS support for the HTTP exporter.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

#[macro_use]
mod internal_logging;

pub mod attributes;
pub mod buffer;
pub mod config;
pub mod error;
pub mod export;
pub mod logs;
pub mod metrics;
pub mod middleware;
pub mod processor;
pub mod resource;
pub mod retry;
pub mod self_metrics;
mod suppression;

pub use attributes::{AttributeSet, Key, KeyValue, Value};
pub use resource::Resource;

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{event, Level};
}
