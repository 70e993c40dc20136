use crate::metrics::MetricError;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

// maximum length of instrument name
const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
// maximum length of instrument unit name
const INSTRUMENT_UNIT_NAME_MAX_LENGTH: usize = 63;
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

// instrument validation error strings
const INSTRUMENT_NAME_EMPTY: &str = "instrument name must be non-empty";
const INSTRUMENT_NAME_LENGTH: &str = "instrument name must be less than 256 characters";
const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "characters in instrument name must be ASCII and belong to the alphanumeric characters, '_', '.', '-' and '/'";
const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name must start with an alphabetic character";
const INSTRUMENT_UNIT_LENGTH: &str = "instrument unit must be less than 64 characters";
const INSTRUMENT_UNIT_INVALID_CHAR: &str = "characters in instrument unit must be ASCII";

/// The kind of an instrument, which decides what its values mean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Monotonic deltas, each `>= 0`.
    Counter,
    /// Individual observations of a distribution.
    Histogram,
    /// The current value, set by application code.
    Gauge,
    /// The current value, reported by a callback at each export tick.
    ObservableGauge,
}

impl InstrumentKind {
    /// The kind as a lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Histogram => "histogram",
            InstrumentKind::Gauge => "gauge",
            InstrumentKind::ObservableGauge => "observable_gauge",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes an instrument: its name, kind and optional unit and description.
///
/// A registry holds at most one instrument per name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstrumentDescriptor {
    name: Cow<'static, str>,
    kind: InstrumentKind,
    unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
}

impl InstrumentDescriptor {
    /// Create a descriptor with no unit and no description.
    pub fn new(name: impl Into<Cow<'static, str>>, kind: InstrumentKind) -> Self {
        InstrumentDescriptor {
            name: name.into(),
            kind,
            unit: None,
            description: None,
        }
    }

    /// Set the unit, e.g. `"s"` or `"By"`.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the human-readable description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The instrument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// The unit, if any.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// The description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub(crate) fn name_cow(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    pub(crate) fn validate(&self) -> Result<(), MetricError> {
        validate_instrument_name(&self.name).and_then(|_| validate_instrument_unit(&self.unit))
    }
}

fn validate_instrument_name(name: &str) -> Result<(), MetricError> {
    if name.is_empty() {
        return Err(MetricError::InvalidInstrumentName(INSTRUMENT_NAME_EMPTY));
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentName(INSTRUMENT_NAME_LENGTH));
    }
    if name.starts_with(|c: char| !c.is_ascii_alphabetic()) {
        return Err(MetricError::InvalidInstrumentName(
            INSTRUMENT_NAME_FIRST_ALPHABETIC,
        ));
    }
    if name.contains(|c: char| {
        !c.is_ascii_alphanumeric() && !INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(MetricError::InvalidInstrumentName(
            INSTRUMENT_NAME_INVALID_CHAR,
        ));
    }
    Ok(())
}

fn validate_instrument_unit(unit: &Option<Cow<'static, str>>) -> Result<(), MetricError> {
    if let Some(unit) = unit {
        if unit.len() > INSTRUMENT_UNIT_NAME_MAX_LENGTH {
            return Err(MetricError::InvalidInstrumentUnit(INSTRUMENT_UNIT_LENGTH));
        }
        if unit.contains(|c: char| !c.is_ascii()) {
            return Err(MetricError::InvalidInstrumentUnit(
                INSTRUMENT_UNIT_INVALID_CHAR,
            ));
        }
    }
    Ok(())
}
