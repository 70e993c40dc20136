//! Request instrumentation for HTTP handlers.
//!
//! [`RequestInstrumentation`] is an explicit start/end contract rather than a
//! hook into a specific web framework. Call
//! [`on_request_start`](RequestInstrumentation::on_request_start) when a
//! request arrives, fill in the route and method on the returned
//! [`RequestHandle`] once routing is known, and pass the handle back to
//! [`on_request_end`](RequestInstrumentation::on_request_end) with the
//! response status.
//!
//! | Metric | Kind | Attributes |
//! |--------|------|------------|
//! | `http_requests_total` | Counter | `route`, `method`, `status` |
//! | `http_request_duration_seconds` | Histogram | `route`, `method` |
//! | `http_requests_in_flight` | Gauge | - |
//!
//! ```
//! use beacon_sdk::metrics::Registry;
//! use beacon_sdk::middleware::RequestInstrumentation;
//!
//! let registry = Registry::builder().build();
//! let instrumentation = RequestInstrumentation::new(&registry).unwrap();
//!
//! let mut request = instrumentation.on_request_start();
//! request.set_route("/cart");
//! request.set_method("GET");
//! // ... handle the request ...
//! instrumentation.on_request_end(request, 200);
//! # registry.shutdown().unwrap();
//! ```
use crate::attributes::KeyValue;
use crate::metrics::{Counter, Gauge, Histogram, MetricError, Registry};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Default name of the request counter.
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Default name of the latency histogram.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
/// Default name of the in-flight gauge.
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

/// Reported when a request ends before its route or method was set.
const UNKNOWN: &str = "unknown";

struct Instruments {
    requests: Counter,
    duration: Histogram,
    in_flight: Gauge,
    // The gauge is set while holding the lock so the last value written
    // always matches the count.
    in_flight_count: Mutex<i64>,
}

impl Instruments {
    fn adjust_in_flight(&self, delta: i64) {
        let mut count = match self.in_flight_count.lock() {
            Ok(count) => count,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count += delta;
        if let Err(err) = self.in_flight.set(*count as f64, &[]) {
            beacon_debug!(name: "RequestInstrumentation.InFlightNotRecorded", error = err.to_string());
        }
    }
}

/// Records request count, latency and concurrency for HTTP handlers.
///
/// Cheap to clone; clones record into the same instruments.
#[derive(Clone)]
pub struct RequestInstrumentation {
    instruments: Arc<Instruments>,
}

impl fmt::Debug for RequestInstrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInstrumentation")
            .field("requests", &self.instruments.requests)
            .field("duration", &self.instruments.duration)
            .field("in_flight", &self.instruments.in_flight)
            .finish()
    }
}

impl RequestInstrumentation {
    /// Registers the instruments under their default names.
    pub fn new(registry: &Registry) -> Result<Self, MetricError> {
        Self::builder().build(registry)
    }

    /// Start configuring instrument names.
    pub fn builder() -> RequestInstrumentationBuilder {
        RequestInstrumentationBuilder::default()
    }

    /// Marks the start of a request: the in-flight gauge goes up by one and
    /// the clock starts.
    pub fn on_request_start(&self) -> RequestHandle {
        self.instruments.adjust_in_flight(1);
        RequestHandle {
            instruments: self.instruments.clone(),
            start: Instant::now(),
            route: None,
            method: None,
        }
    }

    /// Marks the end of a request.
    ///
    /// Adds one to the request counter with `route`, `method` and `status`,
    /// records the elapsed seconds with `route` and `method`, and lowers the
    /// in-flight gauge.
    pub fn on_request_end(&self, handle: RequestHandle, status_code: u16) {
        handle.finish(status_code);
    }

    /// Number of requests started and not yet ended.
    pub fn in_flight(&self) -> i64 {
        match self.instruments.in_flight_count.lock() {
            Ok(count) => *count,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// One request between [`RequestInstrumentation::on_request_start`] and
/// [`RequestInstrumentation::on_request_end`].
///
/// Dropping the handle without ending it still lowers the in-flight gauge,
/// so a panicking handler does not leak a count. Nothing else is recorded in
/// that case.
pub struct RequestHandle {
    instruments: Arc<Instruments>,
    start: Instant,
    route: Option<Cow<'static, str>>,
    method: Option<Cow<'static, str>>,
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("start", &self.start)
            .field("route", &self.route)
            .field("method", &self.method)
            .finish()
    }
}

impl RequestHandle {
    /// Sets the matched route, e.g. `/users/{id}`. Prefer templates over raw
    /// paths to keep the number of series bounded.
    pub fn set_route(&mut self, route: impl Into<Cow<'static, str>>) {
        self.route = Some(route.into());
    }

    /// Sets the request method, e.g. `GET`.
    pub fn set_method(&mut self, method: impl Into<Cow<'static, str>>) {
        self.method = Some(method.into());
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    fn finish(mut self, status_code: u16) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let route = KeyValue::new("route", self.route.take().unwrap_or(Cow::Borrowed(UNKNOWN)));
        let method = KeyValue::new(
            "method",
            self.method.take().unwrap_or(Cow::Borrowed(UNKNOWN)),
        );

        let request_attributes = [
            route.clone(),
            method.clone(),
            KeyValue::new("status", i64::from(status_code)),
        ];
        if let Err(err) = self.instruments.requests.add(1.0, &request_attributes) {
            beacon_debug!(name: "RequestInstrumentation.RequestNotCounted", error = err.to_string());
        }
        if let Err(err) = self.instruments.duration.record(elapsed, &[route, method]) {
            beacon_debug!(name: "RequestInstrumentation.LatencyNotRecorded", error = err.to_string());
        }
        // Drop lowers the in-flight gauge.
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.instruments.adjust_in_flight(-1);
    }
}

/// Configures the instrument names used by [`RequestInstrumentation`].
#[derive(Debug)]
pub struct RequestInstrumentationBuilder {
    requests_name: Cow<'static, str>,
    duration_name: Cow<'static, str>,
    in_flight_name: Cow<'static, str>,
}

impl Default for RequestInstrumentationBuilder {
    fn default() -> Self {
        RequestInstrumentationBuilder {
            requests_name: Cow::Borrowed(HTTP_REQUESTS_TOTAL),
            duration_name: Cow::Borrowed(HTTP_REQUEST_DURATION_SECONDS),
            in_flight_name: Cow::Borrowed(HTTP_REQUESTS_IN_FLIGHT),
        }
    }
}

impl RequestInstrumentationBuilder {
    /// Name of the request counter.
    pub fn with_requests_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.requests_name = name.into();
        self
    }

    /// Name of the latency histogram.
    pub fn with_duration_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.duration_name = name.into();
        self
    }

    /// Name of the in-flight gauge.
    pub fn with_in_flight_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.in_flight_name = name.into();
        self
    }

    /// Registers the instruments with `registry`.
    pub fn build(self, registry: &Registry) -> Result<RequestInstrumentation, MetricError> {
        let requests = registry
            .counter(self.requests_name)
            .with_description("Total number of HTTP requests handled.")
            .build()?;
        let duration = registry
            .histogram(self.duration_name)
            .with_unit("s")
            .with_description("HTTP request latency.")
            .build()?;
        let in_flight = registry
            .gauge(self.in_flight_name)
            .with_description("HTTP requests currently being handled.")
            .build()?;

        Ok(RequestInstrumentation {
            instruments: Arc::new(Instruments {
                requests,
                duration,
                in_flight,
                in_flight_count: Mutex::new(0),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemoryExporter;
    use crate::metrics::{InstrumentKind, MeasurementRecord};
    use crate::processor::BatchConfigBuilder;
    use crate::Value;
    use std::time::Duration;

    fn test_registry() -> (Registry, InMemoryExporter<MeasurementRecord>) {
        let exporter = InMemoryExporter::default();
        let registry = Registry::builder()
            .with_exporter(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .with_high_water_mark(usize::MAX)
                    .build(),
            )
            .build();
        (registry, exporter)
    }

    fn records_of(records: &[MeasurementRecord], name: &str) -> Vec<MeasurementRecord> {
        records.iter().filter(|r| r.name() == name).cloned().collect()
    }

    #[test]
    fn request_lifecycle_records_all_three_instruments() {
        let (registry, exporter) = test_registry();
        let instrumentation = RequestInstrumentation::new(&registry).unwrap();

        let mut handle = instrumentation.on_request_start();
        assert_eq!(instrumentation.in_flight(), 1);
        handle.set_route("/cart");
        handle.set_method("POST");
        instrumentation.on_request_end(handle, 201);
        assert_eq!(instrumentation.in_flight(), 0);

        registry.force_flush().unwrap();
        let records = exporter.get_finished_records().unwrap();

        let requests = records_of(&records, HTTP_REQUESTS_TOTAL);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind(), InstrumentKind::Counter);
        assert_eq!(requests[0].value(), 1.0);
        let attributes = requests[0].attributes();
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes.get("route"), Some(&Value::from("/cart")));
        assert_eq!(attributes.get("method"), Some(&Value::from("POST")));
        assert_eq!(attributes.get("status"), Some(&Value::I64(201)));

        let durations = records_of(&records, HTTP_REQUEST_DURATION_SECONDS);
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].attributes().len(), 2);
        assert!(durations[0].value() >= 0.0);
        assert_eq!(durations[0].instrument().unit(), Some("s"));

        let in_flight: Vec<f64> = records_of(&records, HTTP_REQUESTS_IN_FLIGHT)
            .iter()
            .map(|r| r.value())
            .collect();
        assert_eq!(in_flight, vec![1.0, 0.0]);
        registry.shutdown().unwrap();
    }

    #[test]
    fn missing_route_and_method_are_unknown() {
        let (registry, exporter) = test_registry();
        let instrumentation = RequestInstrumentation::new(&registry).unwrap();
        let handle = instrumentation.on_request_start();
        instrumentation.on_request_end(handle, 404);

        registry.force_flush().unwrap();
        let records = exporter.get_finished_records().unwrap();
        let requests = records_of(&records, HTTP_REQUESTS_TOTAL);
        assert_eq!(requests[0].attributes().get("route"), Some(&Value::from(UNKNOWN)));
        assert_eq!(requests[0].attributes().get("method"), Some(&Value::from(UNKNOWN)));
        registry.shutdown().unwrap();
    }

    #[test]
    fn dropped_handle_only_lowers_in_flight() {
        let (registry, exporter) = test_registry();
        let instrumentation = RequestInstrumentation::new(&registry).unwrap();

        let first = instrumentation.on_request_start();
        let second = instrumentation.on_request_start();
        assert_eq!(instrumentation.in_flight(), 2);
        drop(first);
        assert_eq!(instrumentation.in_flight(), 1);
        instrumentation.on_request_end(second, 500);
        assert_eq!(instrumentation.in_flight(), 0);

        registry.force_flush().unwrap();
        let records = exporter.get_finished_records().unwrap();
        assert_eq!(records_of(&records, HTTP_REQUESTS_TOTAL).len(), 1);
        assert_eq!(records_of(&records, HTTP_REQUEST_DURATION_SECONDS).len(), 1);
        registry.shutdown().unwrap();
    }

    #[test]
    fn handle_dropped_by_panic_is_released() {
        let (registry, _) = test_registry();
        let instrumentation = RequestInstrumentation::new(&registry).unwrap();
        let cloned = instrumentation.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _handle = cloned.on_request_start();
            panic!("handler failed");
        }));
        assert!(result.is_err());
        assert_eq!(instrumentation.in_flight(), 0);
        registry.shutdown().unwrap();
    }

    #[test]
    fn custom_names_are_used() {
        let (registry, _) = test_registry();
        RequestInstrumentation::builder()
            .with_requests_name("api_requests_total")
            .with_duration_name("api_latency_seconds")
            .with_in_flight_name("api_in_flight")
            .build(&registry)
            .unwrap();
        assert!(registry.counter("api_requests_total").build().is_ok());
        assert!(matches!(
            registry.counter("api_in_flight").build(),
            Err(MetricError::ConflictingInstrumentKind { .. })
        ));
        registry.shutdown().unwrap();
    }
}
