use crate::attributes::KeyValue;
use crate::logs::{LogRecord, Logger, LoggerProvider, Severity};
use crate::suppression::SuppressionContext;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const BRIDGE_LOGGER_NAME: &str = "beacon-tracing-bridge";

struct EventVisitor<'a> {
    log_record: &'a mut LogRecord,
}

impl EventVisitor<'_> {
    fn push(&mut self, field: &Field, value: impl Into<crate::Value>) {
        self.log_record
            .push_attribute(KeyValue::new(field.name(), value.into()));
    }
}

impl Visit for EventVisitor<'_> {
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "message" {
            self.log_record.set_body(value.to_string());
        } else {
            self.push(field, value.to_string());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.log_record.set_body(value.to_owned());
        } else {
            self.push(field, value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.log_record.set_body(format!("{value:?}"));
        } else {
            self.push(field, format!("{value:?}"));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match i64::try_from(value) {
            Ok(signed) => self.push(field, signed),
            Err(_) => self.push(field, value.to_string()),
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value);
    }
}

/// A [`tracing_subscriber::Layer`] that forwards `tracing` events to the logs
/// pipeline.
///
/// The event level becomes the [`Severity`], the `message` field the body, the
/// event target the record target, and every other field an attribute. Spans
/// are ignored.
///
/// ```
/// use beacon_sdk::logs::{LoggerProvider, TracingBridge};
/// use tracing_subscriber::prelude::*;
///
/// let provider = LoggerProvider::builder().build();
/// let subscriber = tracing_subscriber::registry().with(TracingBridge::new(&provider));
/// tracing::subscriber::with_default(subscriber, || {
///     tracing::info!(user_id = 42, "signed in");
/// });
/// provider.shutdown().unwrap();
/// ```
#[derive(Debug)]
pub struct TracingBridge {
    logger: Logger,
}

impl TracingBridge {
    /// Forward events to a logger of `provider`.
    pub fn new(provider: &LoggerProvider) -> Self {
        TracingBridge {
            logger: provider.logger(BRIDGE_LOGGER_NAME),
        }
    }
}

impl<S> Layer<S> for TracingBridge
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Events raised by the pipeline itself, such as export failures on
        // the worker thread, must not loop back into it.
        if SuppressionContext::is_suppressed() {
            return;
        }
        let meta = event.metadata();
        let mut log_record = LogRecord::default()
            .with_severity(severity_of(meta.level()))
            .with_target(meta.target());

        let mut visitor = EventVisitor {
            log_record: &mut log_record,
        };
        event.record(&mut visitor);

        let _guard = SuppressionContext::attach();
        self.logger.emit(log_record);
    }
}

fn severity_of(level: &Level) -> Severity {
    match *level {
        Level::TRACE => Severity::Trace,
        Level::DEBUG => Severity::Debug,
        Level::INFO => Severity::Info,
        Level::WARN => Severity::Warn,
        Level::ERROR => Severity::Error,
    }
}
