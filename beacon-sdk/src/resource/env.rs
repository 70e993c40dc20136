//! Environment variables resource detectors.
use crate::attributes::{Key, KeyValue, Value};
use crate::resource::{Resource, ResourceDetector, SERVICE_NAME};
use std::env;

const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
const TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";

/// Extracts resource attributes from `OTEL_RESOURCE_ATTRIBUTES`, formatted as
/// `key1=value1,key2=value2`.
#[derive(Debug)]
pub struct EnvResourceDetector {
    _private: (),
}

impl ResourceDetector for EnvResourceDetector {
    fn detect(&self) -> Resource {
        match env::var(OTEL_RESOURCE_ATTRIBUTES) {
            Ok(s) if !s.is_empty() => construct_resource(&s),
            Ok(_) | Err(_) => Resource::empty(),
        }
    }
}

impl EnvResourceDetector {
    /// Create `EnvResourceDetector` instance.
    pub fn new() -> Self {
        EnvResourceDetector { _private: () }
    }
}

impl Default for EnvResourceDetector {
    fn default() -> Self {
        EnvResourceDetector::new()
    }
}

/// Parses `key1=value1,key2=value2`. Entries without `=` are skipped and
/// surrounding whitespace is trimmed.
pub(crate) fn parse_key_values(s: &str) -> Vec<KeyValue> {
    s.split_terminator(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(KeyValue::new(key.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

fn construct_resource(s: &str) -> Resource {
    Resource::new(parse_key_values(s))
}

/// Detects `service.name`.
///
/// `OTEL_SERVICE_NAME` is tried first, then a `service.name` entry in
/// `OTEL_RESOURCE_ATTRIBUTES`. When neither is present the name falls back to
/// `unknown_service`.
#[derive(Debug)]
pub struct SdkProvidedResourceDetector;

impl ResourceDetector for SdkProvidedResourceDetector {
    fn detect(&self) -> Resource {
        let name = env::var(OTEL_SERVICE_NAME)
            .ok()
            .filter(|s| !s.is_empty())
            .map(Value::from)
            .or_else(|| {
                EnvResourceDetector::new()
                    .detect()
                    .get(&Key::from_static_str(SERVICE_NAME))
            })
            .unwrap_or_else(|| "unknown_service".into());
        Resource::new([KeyValue::new(SERVICE_NAME, name)])
    }
}

/// Detects the name, language and version of this SDK.
#[derive(Debug)]
pub struct TelemetryResourceDetector;

impl ResourceDetector for TelemetryResourceDetector {
    fn detect(&self) -> Resource {
        Resource::new([
            KeyValue::new(TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(TELEMETRY_SDK_LANGUAGE, "rust"),
            KeyValue::new(TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION")),
        ])
    }
}
