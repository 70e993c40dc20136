//! Error types shared by the pipeline's lifecycle operations.
//!
//! Recording errors live in [`crate::metrics::MetricError`], exporter errors in
//! [`crate::export::ExportError`] and bootstrap errors in
//! [`crate::config::ConfigError`]. The types here cover what an operator sees
//! when flushing or shutting down a provider.
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by lifecycle operations such as `force_flush` and `shutdown`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SdkError {
    /// Shutdown has already been invoked.
    ///
    /// While shutdown is idempotent and calling it multiple times has no
    /// impact, this error suggests that another part of the application is
    /// invoking `shutdown` earlier than intended.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// The operation did not complete within the allotted time. Records still
    /// buffered at that point are discarded.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation failed for an internal reason, for example the worker
    /// thread disappeared or a lock was poisoned.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for SdkError {
    fn from(err: PoisonError<T>) -> Self {
        SdkError::InternalFailure(format!("mutex poisoned: {err}"))
    }
}

/// A specialized `Result` type for lifecycle operations.
pub type SdkResult = Result<(), SdkError>;
