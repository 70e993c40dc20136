use crate::attributes::{AttributeSet, KeyValue};
use crate::export::unix_nanos;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

/// Severity of a log record, from least to most severe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Fine-grained debugging.
    Trace,
    /// Debugging.
    Debug,
    /// Informational.
    #[default]
    Info,
    /// Something unexpected that did not prevent the operation.
    Warn,
    /// An operation failed.
    Error,
    /// The process cannot continue.
    Fatal,
}

impl Severity {
    /// Upper-case name, e.g. `WARN`.
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// The lowest severity number of this range on the 1-24 scale used by
    /// common collectors.
    pub fn number(&self) -> u8 {
        match self {
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// One log event, as it travels through the buffer and the exporter.
///
/// Fields left unset are filled in by [`Logger::emit`](crate::logs::Logger::emit):
/// the observed timestamp is always the emit time, the timestamp defaults to
/// it, and the target defaults to the logger name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogRecord {
    pub(crate) timestamp: Option<SystemTime>,
    pub(crate) observed_timestamp: Option<SystemTime>,
    severity: Severity,
    pub(crate) target: Option<Cow<'static, str>>,
    body: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl LogRecord {
    /// A record with `severity` and `body`.
    pub fn new(severity: Severity, body: impl Into<Cow<'static, str>>) -> Self {
        LogRecord {
            severity,
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Sets when the event happened.
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the component the event comes from, e.g. a module path.
    pub fn with_target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the message.
    pub fn with_body(mut self, body: impl Into<Cow<'static, str>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Adds one attribute. A later attribute with the same key wins.
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Adds several attributes.
    pub fn with_attributes<I: IntoIterator<Item = KeyValue>>(mut self, attributes: I) -> Self {
        self.attributes.extend(attributes);
        self
    }

    #[cfg_attr(not(feature = "tracing-bridge"), allow(dead_code))]
    pub(crate) fn push_attribute(&mut self, attribute: KeyValue) {
        self.attributes.push(attribute);
    }

    #[cfg_attr(not(feature = "tracing-bridge"), allow(dead_code))]
    pub(crate) fn set_body(&mut self, body: String) {
        self.body = Some(Cow::Owned(body));
    }

    /// When the event happened.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// When the pipeline received the event.
    pub fn observed_timestamp(&self) -> Option<SystemTime> {
        self.observed_timestamp
    }

    /// How severe the event is.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The component the event comes from.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// The message.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// The attributes, deduplicated by key.
    pub fn attributes(&self) -> AttributeSet {
        AttributeSet::from(&self.attributes[..])
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(timestamp) = self.timestamp.or(self.observed_timestamp) {
            let datetime: DateTime<Utc> = timestamp.into();
            write!(f, "{} ", datetime.to_rfc3339_opts(SecondsFormat::Micros, true))?;
        }
        write!(f, "{:<5}", self.severity)?;
        if let Some(target) = &self.target {
            write!(f, " {target}:")?;
        }
        if let Some(body) = &self.body {
            write!(f, " {body}")?;
        }
        if !self.attributes.is_empty() {
            write!(f, " {}", self.attributes())?;
        }
        Ok(())
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("LogRecord", 7)?;
        record.serialize_field("timeUnixNano", &self.timestamp.map(unix_nanos))?;
        record.serialize_field(
            "observedTimeUnixNano",
            &self.observed_timestamp.map(unix_nanos),
        )?;
        record.serialize_field("severityText", self.severity.name())?;
        record.serialize_field("severityNumber", &self.severity.number())?;
        record.serialize_field("target", &self.target)?;
        record.serialize_field("body", &self.body)?;
        record.serialize_field("attributes", &self.attributes())?;
        record.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample() -> LogRecord {
        LogRecord::new(Severity::Warn, "payment retried")
            .with_timestamp(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
            .with_target("checkout::payments")
            .with_attribute(KeyValue::new("attempt", 2_i64))
            .with_attribute(KeyValue::new("provider", "acme"))
    }

    #[test]
    fn display_is_single_line() {
        assert_eq!(
            sample().to_string(),
            "2023-11-14T22:13:20.000000Z WARN  checkout::payments: payment retried {attempt=2, provider=acme}"
        );
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["timeUnixNano"], 1_700_000_000_000_000_000u64);
        assert!(json["observedTimeUnixNano"].is_null());
        assert_eq!(json["severityText"], "WARN");
        assert_eq!(json["severityNumber"], 13);
        assert_eq!(json["target"], "checkout::payments");
        assert_eq!(json["body"], "payment retried");
        assert_eq!(json["attributes"]["attempt"], 2);
    }

    #[test]
    fn later_attribute_wins() {
        let record = LogRecord::default()
            .with_attribute(KeyValue::new("user", "a"))
            .with_attribute(KeyValue::new("user", "b"));
        assert_eq!(record.attributes().get("user"), Some(&"b".into()));
    }

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::default(), Severity::Info);
    }
}
