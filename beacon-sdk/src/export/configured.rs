use crate::error::SdkResult;
use crate::export::{ConsoleExporter, ExportBatch, ExportResult, Exporter, NoopExporter};
#[cfg(feature = "http")]
use crate::export::HttpExporter;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;

/// An exporter selected at runtime, typically from
/// [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfiguredExporter {
    /// Discards every batch.
    Noop(NoopExporter),
    /// Writes batches to stdout.
    Console(ConsoleExporter),
    /// POSTs batches to a collector.
    #[cfg(feature = "http")]
    Http(HttpExporter),
}

impl From<NoopExporter> for ConfiguredExporter {
    fn from(exporter: NoopExporter) -> Self {
        ConfiguredExporter::Noop(exporter)
    }
}

impl From<ConsoleExporter> for ConfiguredExporter {
    fn from(exporter: ConsoleExporter) -> Self {
        ConfiguredExporter::Console(exporter)
    }
}

#[cfg(feature = "http")]
impl From<HttpExporter> for ConfiguredExporter {
    fn from(exporter: HttpExporter) -> Self {
        ConfiguredExporter::Http(exporter)
    }
}

impl<R> Exporter<R> for ConfiguredExporter
where
    R: Display + Serialize + Send + Sync + 'static,
{
    #[allow(clippy::manual_async_fn)]
    fn export(&self, batch: &ExportBatch<R>) -> impl Future<Output = ExportResult> + Send {
        async move {
            match self {
                ConfiguredExporter::Noop(exporter) => exporter.export(batch).await,
                ConfiguredExporter::Console(exporter) => exporter.export(batch).await,
                #[cfg(feature = "http")]
                ConfiguredExporter::Http(exporter) => exporter.export(batch).await,
            }
        }
    }

    fn shutdown(&self) -> SdkResult {
        match self {
            ConfiguredExporter::Noop(exporter) => Exporter::<R>::shutdown(exporter),
            ConfiguredExporter::Console(exporter) => Exporter::<R>::shutdown(exporter),
            #[cfg(feature = "http")]
            ConfiguredExporter::Http(exporter) => Exporter::<R>::shutdown(exporter),
        }
    }
}
