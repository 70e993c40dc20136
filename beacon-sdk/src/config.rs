//! Bootstrap options for a whole pipeline.
//!
//! [`PipelineConfig`] gathers every option needed to build a
//! [`Registry`](crate::metrics::Registry) or a
//! [`LoggerProvider`](crate::logs::LoggerProvider) in one place. It can be
//! built in code, read from the environment with [`PipelineConfig::from_env`],
//! or deserialized from JSON with [`PipelineConfig::from_json`]:
//!
//! ```
//! use beacon_sdk::config::{ExporterKind, PipelineConfig};
//!
//! let config = PipelineConfig::from_json(
//!     r#"{ "serviceName": "checkout", "exporterKind": "noop", "exportIntervalMs": 1000 }"#,
//! )
//! .unwrap();
//! assert_eq!(config.exporter_kind, ExporterKind::Noop);
//! assert_eq!(config.max_batch_size, 512);
//! ```
//!
//! # Environment variables
//!
//! | Variable | Option |
//! |---|---|
//! | `OTEL_SERVICE_NAME` | `service_name` |
//! | `OTEL_RESOURCE_ATTRIBUTES` | `resource_attributes` (`k1=v1,k2=v2`) |
//! | `BEACON_EXPORT_INTERVAL` | `export_interval_ms` |
//! | `BEACON_MAX_EXPORT_BATCH_SIZE` | `max_batch_size` |
//! | `BEACON_MAX_QUEUE_SIZE` | `max_queue_size` |
//! | `BEACON_SHUTDOWN_TIMEOUT` | `shutdown_timeout_ms` |
//! | `BEACON_EXPORTER` | `exporter_kind` (`http`, `console` or `noop`) |
//! | `BEACON_EXPORTER_ENDPOINT` | `exporter_endpoint` |
//! | `BEACON_CONSOLE_DEBUG` | `console_debug` (`true` or `false`) |
//!
//! Resource attributes read from `OTEL_RESOURCE_ATTRIBUTES` are always
//! strings. In JSON, `resourceAttributes` values keep their type: booleans,
//! integers, floats and strings are all accepted.
use crate::attributes::{KeyValue, Value};
use crate::export::{ConfiguredExporter, ConsoleExporter, FanoutExporter, NoopExporter};
use crate::metrics::DEFAULT_CALLBACK_TIMEOUT;
use crate::processor::{
    BatchConfig, BatchConfigBuilder, BEACON_EXPORT_INTERVAL, BEACON_EXPORT_INTERVAL_DEFAULT,
    BEACON_MAX_EXPORT_BATCH_SIZE, BEACON_MAX_EXPORT_BATCH_SIZE_DEFAULT, BEACON_MAX_QUEUE_SIZE,
    BEACON_MAX_QUEUE_SIZE_DEFAULT, BEACON_SHUTDOWN_TIMEOUT, BEACON_SHUTDOWN_TIMEOUT_DEFAULT,
};
use crate::resource::env::parse_key_values;
use crate::retry::RetryPolicy;
use crate::Resource;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Exporter selection, corresponding environment variable.
pub const BEACON_EXPORTER: &str = "BEACON_EXPORTER";

const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
const BEACON_CONSOLE_DEBUG: &str = "BEACON_CONSOLE_DEBUG";

#[cfg(feature = "http")]
const BEACON_EXPORTER_ENDPOINT: &str = crate::export::http::BEACON_EXPORTER_ENDPOINT;
#[cfg(not(feature = "http"))]
const BEACON_EXPORTER_ENDPOINT: &str = "BEACON_EXPORTER_ENDPOINT";

const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while reading or applying a [`PipelineConfig`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value '{value}' for {name}")]
    InvalidEnvValue {
        /// The variable.
        name: &'static str,
        /// Its raw value.
        value: String,
    },

    /// The exporter name is not one of `http`, `console` or `noop`.
    #[error("unknown exporter '{0}', expected one of: http, console, noop")]
    UnknownExporter(String),

    /// The JSON document cannot be deserialized.
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP exporter could not be created.
    #[cfg(feature = "http")]
    #[error(transparent)]
    HttpExporter(#[from] crate::export::http::ExporterBuildError),

    /// The `http` exporter was selected but the `http` feature is disabled.
    #[error("the http exporter requires the `http` feature")]
    HttpUnavailable,
}

/// Where exported batches go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// POST JSON batches to a collector.
    #[default]
    Http,
    /// Print batches to stdout.
    Console,
    /// Discard batches.
    Noop,
}

impl FromStr for ExporterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ExporterKind::Http),
            "console" => Ok(ExporterKind::Console),
            "noop" | "none" => Ok(ExporterKind::Noop),
            other => Err(ConfigError::UnknownExporter(other.to_string())),
        }
    }
}

impl fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExporterKind::Http => "http",
            ExporterKind::Console => "console",
            ExporterKind::Noop => "noop",
        })
    }
}

/// Every option needed to bootstrap a pipeline.
///
/// Missing JSON keys and unset environment variables keep their defaults.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// `service.name` of the resource. Detected from the environment when unset.
    pub service_name: Option<String>,
    /// Extra resource attributes. These override detected ones.
    pub resource_attributes: HashMap<String, Value>,
    /// Delay between two scheduled exports. Default 5000.
    pub export_interval_ms: u64,
    /// Maximum records per export call. Default 512.
    pub max_batch_size: usize,
    /// Capacity of the measurement buffer. Default 2048.
    pub max_queue_size: usize,
    /// Deadline for the final export at shutdown. Default 5000.
    pub shutdown_timeout_ms: u64,
    /// Export attempts per batch, the first one included. Default 3.
    pub max_export_attempts: usize,
    /// Budget for all observable callbacks of one tick. Default 1000.
    pub callback_timeout_ms: u64,
    /// Per-request timeout of the HTTP exporter. Default 10000.
    pub export_timeout_ms: u64,
    /// Which exporter to build. Default `http`.
    pub exporter_kind: ExporterKind,
    /// Collector base URL for the HTTP exporter.
    pub exporter_endpoint: Option<String>,
    /// Also print every batch to stdout, next to the selected exporter.
    /// Default `false`.
    pub console_debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            service_name: None,
            resource_attributes: HashMap::new(),
            export_interval_ms: BEACON_EXPORT_INTERVAL_DEFAULT.as_millis() as u64,
            max_batch_size: BEACON_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_queue_size: BEACON_MAX_QUEUE_SIZE_DEFAULT,
            shutdown_timeout_ms: BEACON_SHUTDOWN_TIMEOUT_DEFAULT.as_millis() as u64,
            max_export_attempts: RetryPolicy::default().max_attempts,
            callback_timeout_ms: DEFAULT_CALLBACK_TIMEOUT.as_millis() as u64,
            export_timeout_ms: DEFAULT_EXPORT_TIMEOUT_MS,
            exporter_kind: ExporterKind::default(),
            exporter_endpoint: None,
            console_debug: false,
        }
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue { name, value }),
        _ => Ok(None),
    }
}

impl PipelineConfig {
    /// Default options overridden by the environment variables listed in the
    /// [module documentation](self).
    ///
    /// Unlike the lenient builders, a variable that is set but cannot be
    /// parsed is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = PipelineConfig::default();

        if let Some(name) = env::var(OTEL_SERVICE_NAME).ok().filter(|s| !s.is_empty()) {
            config.service_name = Some(name);
        }
        if let Ok(attributes) = env::var(OTEL_RESOURCE_ATTRIBUTES) {
            config.resource_attributes = parse_key_values(&attributes)
                .into_iter()
                .map(|kv| (kv.key.to_string(), kv.value))
                .collect();
        }
        if let Some(interval) = parse_env(BEACON_EXPORT_INTERVAL)? {
            config.export_interval_ms = interval;
        }
        if let Some(size) = parse_env(BEACON_MAX_EXPORT_BATCH_SIZE)? {
            config.max_batch_size = size;
        }
        if let Some(size) = parse_env(BEACON_MAX_QUEUE_SIZE)? {
            config.max_queue_size = size;
        }
        if let Some(timeout) = parse_env(BEACON_SHUTDOWN_TIMEOUT)? {
            config.shutdown_timeout_ms = timeout;
        }
        if let Some(kind) = env::var(BEACON_EXPORTER).ok().filter(|s| !s.is_empty()) {
            config.exporter_kind = kind.parse()?;
        }
        if let Some(endpoint) = env::var(BEACON_EXPORTER_ENDPOINT)
            .ok()
            .filter(|s| !s.is_empty())
        {
            config.exporter_endpoint = Some(endpoint);
        }
        if let Some(console_debug) = parse_env::<Flag>(BEACON_CONSOLE_DEBUG)? {
            config.console_debug = console_debug.0;
        }

        Ok(config)
    }

    /// Deserializes a camelCase JSON document. Unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The detected resource merged with `resource_attributes`, then
    /// `service_name`.
    pub fn resource(&self) -> Resource {
        let mut builder = Resource::builder().with_attributes(
            self.resource_attributes
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
        );
        if let Some(name) = &self.service_name {
            builder = builder.with_service_name(name.clone());
        }
        builder.build()
    }

    /// Batching options. Values set here take precedence over the
    /// environment.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfigBuilder::default()
            .with_scheduled_delay(Duration::from_millis(self.export_interval_ms))
            .with_max_queue_size(self.max_queue_size)
            .with_max_export_batch_size(self.max_batch_size)
            .with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .with_max_export_attempts(self.max_export_attempts)
            .build()
    }

    /// Budget for the observable callbacks of one tick.
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    /// The exporter for the metrics signal.
    pub fn metrics_exporter(&self) -> Result<FanoutExporter<ConfiguredExporter>, ConfigError> {
        self.exporters(Signal::Metrics)
    }

    /// The exporter for the logs signal.
    pub fn logs_exporter(&self) -> Result<FanoutExporter<ConfiguredExporter>, ConfigError> {
        self.exporters(Signal::Logs)
    }

    /// The selected exporter, followed by a console exporter when
    /// `console_debug` is set and the selected one does not already print.
    fn exporters(&self, signal: Signal) -> Result<FanoutExporter<ConfiguredExporter>, ConfigError> {
        let mut builder = FanoutExporter::builder().with_exporter(self.exporter(signal)?);
        if self.console_debug && self.exporter_kind != ExporterKind::Console {
            builder = builder.with_exporter(ConsoleExporter::default().into());
        }
        Ok(builder.build())
    }

    fn exporter(&self, signal: Signal) -> Result<ConfiguredExporter, ConfigError> {
        match self.exporter_kind {
            ExporterKind::Noop => Ok(NoopExporter::new().into()),
            ExporterKind::Console => Ok(ConsoleExporter::default().into()),
            #[cfg(feature = "http")]
            ExporterKind::Http => {
                let mut builder = crate::export::HttpExporter::builder()
                    .with_timeout(Duration::from_millis(self.export_timeout_ms));
                if let Some(endpoint) = &self.exporter_endpoint {
                    builder = builder.with_endpoint(endpoint.clone());
                }
                let exporter = match signal {
                    Signal::Metrics => builder.build_metrics_exporter()?,
                    Signal::Logs => builder.build_logs_exporter()?,
                };
                Ok(exporter.into())
            }
            #[cfg(not(feature = "http"))]
            ExporterKind::Http => {
                let _ = signal;
                Err(ConfigError::HttpUnavailable)
            }
        }
    }
}

/// `true` or `false`, in any case.
struct Flag(bool);

impl FromStr for Flag {
    type Err = std::str::ParseBoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_ascii_lowercase().parse().map(Flag)
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Metrics,
    Logs,
}
