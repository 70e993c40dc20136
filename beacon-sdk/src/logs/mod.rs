//! The logs signal.
//!
//! A [`LoggerProvider`] owns a batch processor of [`LogRecord`]s, fed by the
//! [`Logger`]s it hands out. Application `tracing` events can be forwarded
//! with the [`TracingBridge`] layer (feature `tracing-bridge`).
#[cfg(feature = "tracing-bridge")]
mod bridge;
mod provider;
mod record;

#[cfg(feature = "tracing-bridge")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing-bridge")))]
pub use bridge::TracingBridge;
pub use provider::{Logger, LoggerProvider, LoggerProviderBuilder};
pub use record::{LogRecord, Severity};
