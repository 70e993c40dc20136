use crate::attributes::AttributeSet;
use crate::export::unix_nanos;
use crate::metrics::{InstrumentDescriptor, InstrumentKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// One recorded measurement, as it travels through the buffer and the exporter.
///
/// Counter records carry a delta, histogram records a single observation,
/// gauge and observable gauge records the value at `timestamp`. Records are
/// immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementRecord {
    instrument: Arc<InstrumentDescriptor>,
    attributes: AttributeSet,
    value: f64,
    timestamp: SystemTime,
}

impl MeasurementRecord {
    pub(crate) fn new(
        instrument: Arc<InstrumentDescriptor>,
        attributes: AttributeSet,
        value: f64,
        timestamp: SystemTime,
    ) -> Self {
        MeasurementRecord {
            instrument,
            attributes,
            value,
            timestamp,
        }
    }

    /// The instrument that produced this record.
    pub fn instrument(&self) -> &InstrumentDescriptor {
        &self.instrument
    }

    /// Shorthand for `instrument().name()`.
    pub fn name(&self) -> &str {
        self.instrument.name()
    }

    /// Shorthand for `instrument().kind()`.
    pub fn kind(&self) -> InstrumentKind {
        self.instrument.kind()
    }

    /// The attributes the value was recorded with.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// The recorded value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Wall-clock time of the recording call.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let datetime: DateTime<Utc> = self.timestamp.into();
        write!(
            f,
            "{} {} {}{} {}",
            datetime.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.kind(),
            self.name(),
            self.attributes,
            self.value
        )?;
        if let Some(unit) = self.instrument.unit() {
            write!(f, " {unit}")?;
        }
        Ok(())
    }
}

impl Serialize for MeasurementRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("MeasurementRecord", 7)?;
        record.serialize_field("name", self.name())?;
        record.serialize_field("kind", &self.kind())?;
        record.serialize_field("unit", &self.instrument.unit())?;
        record.serialize_field("description", &self.instrument.description())?;
        record.serialize_field("attributes", &self.attributes)?;
        record.serialize_field("value", &self.value)?;
        record.serialize_field("timeUnixNano", &unix_nanos(self.timestamp))?;
        record.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyValue;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample() -> MeasurementRecord {
        MeasurementRecord::new(
            Arc::new(
                InstrumentDescriptor::new("http_request_duration_seconds", InstrumentKind::Histogram)
                    .with_unit("s"),
            ),
            AttributeSet::from(&[KeyValue::new("route", "/cart")][..]),
            0.25,
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        )
    }

    #[test]
    fn display_is_single_line() {
        assert_eq!(
            sample().to_string(),
            "2023-11-14T22:13:20.000000Z histogram http_request_duration_seconds{route=/cart} 0.25 s"
        );
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["name"], "http_request_duration_seconds");
        assert_eq!(json["kind"], "histogram");
        assert_eq!(json["unit"], "s");
        assert!(json["description"].is_null());
        assert_eq!(json["attributes"]["route"], "/cart");
        assert_eq!(json["value"], 0.25);
        assert_eq!(json["timeUnixNano"], 1_700_000_000_000_000_000u64);
    }
}
