use crate::error::{SdkError, SdkResult};
use crate::export::{ExportBatch, ExportError, ExportResult, Exporter};
use std::fmt::{self, Display};
use std::future::Future;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// An exporter that writes a human-readable rendering of each batch.
///
/// The resource is printed once, before the first batch. Each record is then
/// printed on its own line using its `Display` implementation.
pub struct ConsoleExporter {
    writer: Mutex<Box<dyn Write + Send>>,
    is_shutdown: AtomicBool,
    resource_emitted: AtomicBool,
    batch_count: AtomicU64,
}

impl fmt::Debug for ConsoleExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsoleExporter")
    }
}

impl Default for ConsoleExporter {
    fn default() -> Self {
        ConsoleExporterBuilder::default().build()
    }
}

impl ConsoleExporter {
    /// Return a builder to configure the exporter.
    pub fn builder() -> ConsoleExporterBuilder {
        ConsoleExporterBuilder::default()
    }

    fn write_batch<R: Display>(&self, batch: &ExportBatch<R>) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        if !self.resource_emitted.swap(true, Ordering::SeqCst) {
            writeln!(writer, "Resource")?;
            for (k, v) in batch.resource().iter() {
                writeln!(writer, "\t ->  {k}={v}")?;
            }
        }
        let batch_number = self.batch_count.fetch_add(1, Ordering::SeqCst) + 1;
        writeln!(writer, "Batch #{batch_number} ({} records)", batch.len())?;
        for record in batch.records() {
            writeln!(writer, "\t{record}")?;
        }
        writer.flush()
    }
}

impl<R> Exporter<R> for ConsoleExporter
where
    R: Display + Sync + 'static,
{
    #[allow(clippy::manual_async_fn)]
    fn export(&self, batch: &ExportBatch<R>) -> impl Future<Output = ExportResult> + Send {
        async move {
            if self.is_shutdown.load(Ordering::SeqCst) {
                return Err(ExportError::Permanent("exporter is shut down".into()));
            }
            self.write_batch(batch)
                .map_err(|err| ExportError::Transient(format!("write failed: {err}")))
        }
    }

    fn shutdown(&self) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(SdkError::AlreadyShutdown);
        }
        Ok(())
    }
}

/// Configuration for [`ConsoleExporter`].
pub struct ConsoleExporterBuilder {
    writer: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for ConsoleExporterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsoleExporterBuilder")
    }
}

impl Default for ConsoleExporterBuilder {
    fn default() -> Self {
        ConsoleExporterBuilder { writer: None }
    }
}

impl ConsoleExporterBuilder {
    /// Write to `writer` instead of stdout.
    pub fn with_writer<W>(mut self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Create a [`ConsoleExporter`] with the current configuration.
    pub fn build(self) -> ConsoleExporter {
        ConsoleExporter {
            writer: Mutex::new(self.writer.unwrap_or_else(|| Box::new(io::stdout()))),
            is_shutdown: AtomicBool::new(false),
            resource_emitted: AtomicBool::new(false),
            batch_count: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyValue, Resource};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn prints_resource_once_then_records() {
        let buf = SharedBuf::default();
        let exporter = ConsoleExporter::builder().with_writer(buf.clone()).build();
        let resource = Resource::new([KeyValue::new("service.name", "demo")]);

        let first = ExportBatch::new(resource.clone(), vec!["alpha", "beta"]);
        let second = ExportBatch::new(resource, vec!["gamma"]);
        futures_executor::block_on(exporter.export(&first)).unwrap();
        futures_executor::block_on(exporter.export(&second)).unwrap();

        let output = buf.contents();
        assert_eq!(output.matches("Resource").count(), 1);
        assert!(output.contains("service.name=demo"));
        assert!(output.contains("Batch #1 (2 records)\n\talpha\n\tbeta\n"));
        assert!(output.contains("Batch #2 (1 records)\n\tgamma\n"));
    }

    #[test]
    fn rejects_after_shutdown() {
        let exporter = ConsoleExporter::builder()
            .with_writer(SharedBuf::default())
            .build();
        assert!(Exporter::<&str>::shutdown(&exporter).is_ok());
        assert!(matches!(
            Exporter::<&str>::shutdown(&exporter),
            Err(SdkError::AlreadyShutdown)
        ));

        let batch = ExportBatch::new(Resource::empty(), vec!["late"]);
        let result = futures_executor::block_on(exporter.export(&batch));
        assert!(matches!(result, Err(ExportError::Permanent(_))));
    }
}
