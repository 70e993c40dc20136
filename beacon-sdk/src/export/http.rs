//! HTTP/JSON exporter.
//!
//! Each batch is serialized with `serde_json` and POSTed to
//! `<endpoint>/v1/metrics` or `<endpoint>/v1/logs`. The response status
//! decides whether the processor retries:
//!
//! | Outcome                                   | Result                     |
//! |-------------------------------------------|----------------------------|
//! | 2xx                                       | acknowledged               |
//! | 5xx, 408, 429, timeout, connection error  | [`ExportError::Transient`] |
//! | any other 4xx                             | [`ExportError::Permanent`] |
use crate::error::{SdkError, SdkResult};
use crate::export::{ExportBatch, ExportError, ExportResult, Exporter};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode, Uri};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{env, thread};
use thiserror::Error;

#[doc(no_inline)]
pub use bytes::Bytes;
#[doc(no_inline)]
pub use http::{Request, Response};

/// Base URL of the collector. Signal paths are appended to it.
pub const BEACON_EXPORTER_ENDPOINT: &str = "BEACON_EXPORTER_ENDPOINT";
/// Default collector base URL.
pub const BEACON_EXPORTER_ENDPOINT_DEFAULT: &str = "http://localhost:4318";
/// Default per-request timeout.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

const METRICS_PATH: &str = "/v1/metrics";
const LOGS_PATH: &str = "/v1/logs";

/// Error type returned by an [`HttpClient`] when a request could not be
/// completed at all.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal interface necessary for sending requests over HTTP.
///
/// Implement this to bring your own HTTP client. The request is sent from the
/// processor's worker thread, so blocking clients are fine.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the specified HTTP request with a `Bytes` payload.
    ///
    /// Returns the response, whatever its status code. Returns an error only
    /// if the request could not be completed, e.g. because of a timeout or a
    /// refused connection.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

#[async_trait]
impl HttpClient for reqwest::blocking::Client {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        beacon_debug!(name: "ReqwestBlockingClient.Send");
        let request = request.try_into()?;
        let mut response = self.execute(request)?;
        let headers = std::mem::take(response.headers_mut());
        let mut http_response = Response::builder()
            .status(response.status())
            .body(response.bytes()?)?;
        *http_response.headers_mut() = headers;

        Ok(http_response)
    }
}

/// Errors raised while building an [`HttpExporter`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExporterBuildError {
    /// The endpoint plus signal path is not a valid URI.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// The default HTTP client could not be created.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(String),
}

/// Maps a collector response status to an export result.
pub fn classify_status(status: StatusCode) -> ExportResult {
    match status.as_u16() {
        200..=299 => Ok(()),
        408 | 429 => Err(ExportError::Transient(format!("collector throttled: {status}"))),
        400..=499 => Err(ExportError::Permanent(format!("collector rejected batch: {status}"))),
        _ => Err(ExportError::Transient(format!("collector unavailable: {status}"))),
    }
}

/// Exports batches as JSON over HTTP.
#[derive(Debug)]
pub struct HttpExporter {
    client: Mutex<Option<Arc<dyn HttpClient>>>,
    collector_endpoint: Uri,
    headers: HashMap<HeaderName, HeaderValue>,
}

impl HttpExporter {
    /// Return a builder to configure the exporter.
    pub fn builder() -> HttpExporterBuilder {
        HttpExporterBuilder::default()
    }

    /// The full URL batches are POSTed to.
    pub fn endpoint(&self) -> &Uri {
        &self.collector_endpoint
    }

    fn current_client(&self) -> Result<Arc<dyn HttpClient>, ExportError> {
        let guard = self
            .client
            .lock()
            .map_err(|err| ExportError::Transient(format!("failed to acquire lock: {err}")))?;
        guard
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| ExportError::Permanent("exporter is shut down".into()))
    }

    fn build_request<R: Serialize>(
        &self,
        batch: &ExportBatch<R>,
    ) -> Result<Request<Bytes>, ExportError> {
        let body = serde_json::to_vec(batch)
            .map_err(|err| ExportError::Permanent(format!("failed to serialize batch: {err}")))?;
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.collector_endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))
            .map_err(|err| ExportError::Permanent(format!("failed to build request: {err}")))?;
        for (k, v) in self.headers.iter() {
            request.headers_mut().insert(k.clone(), v.clone());
        }
        Ok(request)
    }
}

impl<R> Exporter<R> for HttpExporter
where
    R: Serialize + Sync + 'static,
{
    #[allow(clippy::manual_async_fn)]
    fn export(&self, batch: &ExportBatch<R>) -> impl Future<Output = ExportResult> + Send {
        async move {
            let client = self.current_client()?;
            let request = self.build_request(batch)?;

            beacon_debug!(name: "HttpExporter.ExportStarted", records = batch.len());
            let response = client
                .send_bytes(request)
                .await
                .map_err(|err| ExportError::Transient(format!("network error: {err}")))?;

            let result = classify_status(response.status());
            match &result {
                Ok(()) => {
                    beacon_debug!(name: "HttpExporter.ExportSucceeded");
                }
                Err(err) => {
                    beacon_debug!(
                        name: "HttpExporter.ExportFailed",
                        url = self.collector_endpoint.to_string(),
                        error = err.to_string()
                    );
                }
            }
            result
        }
    }

    fn shutdown(&self) -> SdkResult {
        let mut client = self.client.lock()?;
        if client.take().is_none() {
            return Err(SdkError::AlreadyShutdown);
        }
        Ok(())
    }
}

/// Configuration for [`HttpExporter`].
///
/// The endpoint defaults to `$BEACON_EXPORTER_ENDPOINT`, falling back to
/// [`BEACON_EXPORTER_ENDPOINT_DEFAULT`].
#[derive(Debug)]
pub struct HttpExporterBuilder {
    endpoint: String,
    timeout: Duration,
    headers: HashMap<String, String>,
    client: Option<Arc<dyn HttpClient>>,
}

impl Default for HttpExporterBuilder {
    fn default() -> Self {
        HttpExporterBuilder {
            endpoint: env::var(BEACON_EXPORTER_ENDPOINT)
                .unwrap_or_else(|_| BEACON_EXPORTER_ENDPOINT_DEFAULT.to_string()),
            timeout: DEFAULT_EXPORT_TIMEOUT,
            headers: HashMap::new(),
            client: None,
        }
    }
}

impl HttpExporterBuilder {
    /// Set the collector base URL, e.g. `http://collector:4318`.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the per-request timeout of the default client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set additional headers to send with every request.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Use `client` instead of the default blocking `reqwest` client.
    pub fn with_http_client<T: HttpClient + 'static>(mut self, client: T) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Create an exporter posting to `<endpoint>/v1/metrics`.
    pub fn build_metrics_exporter(self) -> Result<HttpExporter, ExporterBuildError> {
        self.build(METRICS_PATH)
    }

    /// Create an exporter posting to `<endpoint>/v1/logs`.
    pub fn build_logs_exporter(self) -> Result<HttpExporter, ExporterBuildError> {
        self.build(LOGS_PATH)
    }

    fn build(self, signal_path: &str) -> Result<HttpExporter, ExporterBuildError> {
        let endpoint = resolve_endpoint(&self.endpoint, signal_path)?;

        let client = match self.client {
            Some(client) => client,
            None => default_client(self.timeout)?,
        };

        #[allow(clippy::mutable_key_type)] // http headers are not mutated
        let headers = self
            .headers
            .into_iter()
            .filter_map(|(k, v)| {
                Some((
                    HeaderName::from_str(&k).ok()?,
                    HeaderValue::from_str(&v).ok()?,
                ))
            })
            .collect();

        Ok(HttpExporter {
            client: Mutex::new(Some(client)),
            collector_endpoint: endpoint,
            headers,
        })
    }
}

fn resolve_endpoint(base: &str, signal_path: &str) -> Result<Uri, ExporterBuildError> {
    let url = format!("{}{signal_path}", base.trim_end_matches('/'));
    url.parse::<Uri>()
        .map_err(|_| ExporterBuildError::InvalidEndpoint(url))
}

// The blocking client owns a private runtime and panics if created from
// inside another one, so it is always built on a fresh thread.
fn default_client(timeout: Duration) -> Result<Arc<dyn HttpClient>, ExporterBuildError> {
    let client = thread::spawn(move || {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| err.to_string())
    })
    .join()
    .map_err(|_| ExporterBuildError::ClientBuild("client builder panicked".into()))?
    .map_err(ExporterBuildError::ClientBuild)?;
    Ok(Arc::new(client))
}
