use crate::metrics::InstrumentKind;
use std::borrow::Cow;
use thiserror::Error;

/// Errors returned synchronously by instrument registration and recording.
///
/// Export problems never show up here: they stay inside the batch processor
/// and are only visible through [`SelfMetrics`](crate::self_metrics::SelfMetrics).
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MetricError {
    /// The value cannot be recorded by this instrument: a negative counter
    /// delta, or NaN or an infinity.
    #[error("invalid value {value} for instrument '{instrument}'")]
    InvalidValue {
        /// Name of the instrument.
        instrument: Cow<'static, str>,
        /// The rejected value.
        value: f64,
    },

    /// The name is already registered with another instrument kind.
    #[error("instrument '{name}' is already registered as a {existing}, cannot register it as a {requested}")]
    ConflictingInstrumentKind {
        /// Name of the instrument.
        name: Cow<'static, str>,
        /// Kind the name was first registered with.
        existing: InstrumentKind,
        /// Kind of the rejected registration.
        requested: InstrumentKind,
    },

    /// The instrument name breaks the naming rules.
    #[error("invalid instrument name: {0}")]
    InvalidInstrumentName(&'static str),

    /// The instrument unit breaks the unit rules.
    #[error("invalid instrument unit: {0}")]
    InvalidInstrumentUnit(&'static str),

    /// Other errors not covered by specific cases.
    #[error("metrics error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for MetricError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MetricError::Internal(err.to_string())
    }
}
