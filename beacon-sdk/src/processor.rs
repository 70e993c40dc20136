//! # Batch Processor
//!
//! The `BatchProcessor` moves records from a [`MeasurementBuffer`] to an
//! [`Exporter`] in batches, on a dedicated background thread, so that the
//! threads recording telemetry never perform I/O.
//!
//! ## Diagram
//!
//! ```ascii
//!   +--------------+   +-------------------+   +----------------+   +------------+
//!   | submit(rec)  +---> MeasurementBuffer +---> worker thread  +---> Exporter   |
//!   +--------------+   +-------------------+   +-------+--------+   +------------+
//!                                                      ^
//!                      timer / high-water mark / force_flush / shutdown
//! ```
//!
//! ## State machine
//!
//! - `Idle -> Draining`: the export interval elapsed, the buffer crossed its
//!   high-water mark, or `force_flush` was called.
//! - `Draining -> Exporting`: the drained records are split into batches of at
//!   most `max_export_batch_size` and exported one after the other.
//! - `Exporting -> Idle`: every batch was acknowledged, or failed and was
//!   dropped once the retry policy gave up.
//! - `Any -> ShuttingDown`: `shutdown` performs a final drain and export
//!   bounded by `shutdown_timeout`. Records that cannot be exported before the
//!   deadline are discarded and counted as dropped.

use crate::buffer::MeasurementBuffer;
use crate::error::{SdkError, SdkResult};
use crate::export::{ExportBatch, ExportResult, Exporter};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::self_metrics::{PipelineStats, SelfMetrics};
use crate::suppression::SuppressionContext;
use crate::Resource;
use std::cmp::min;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{fence, AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use std::{env, thread};

/// Delay interval between two consecutive exports, in milliseconds.
pub const BEACON_EXPORT_INTERVAL: &str = "BEACON_EXPORT_INTERVAL";
/// Default delay interval between two consecutive exports.
pub const BEACON_EXPORT_INTERVAL_DEFAULT: Duration = Duration::from_millis(5_000);
/// Maximum number of records buffered between exports.
pub const BEACON_MAX_QUEUE_SIZE: &str = "BEACON_MAX_QUEUE_SIZE";
/// Default maximum queue size.
pub const BEACON_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum batch size, must be less than or equal to `BEACON_MAX_QUEUE_SIZE`.
pub const BEACON_MAX_EXPORT_BATCH_SIZE: &str = "BEACON_MAX_EXPORT_BATCH_SIZE";
/// Default maximum batch size.
pub const BEACON_MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;
/// Deadline for the final flush on shutdown, in milliseconds.
pub const BEACON_SHUTDOWN_TIMEOUT: &str = "BEACON_SHUTDOWN_TIMEOUT";
/// Default shutdown deadline.
pub const BEACON_SHUTDOWN_TIMEOUT_DEFAULT: Duration = Duration::from_millis(5_000);

/// Hook run on the worker thread at the start of every export cycle, before
/// the buffer is drained. Observable instruments use it to append their
/// observations.
pub(crate) type TickHook<R> = Box<dyn FnMut(&MeasurementBuffer<R>) + Send>;

/// Hook run on the worker thread after the buffer is drained. It receives the
/// current self-metrics and returns records exported along with the drained
/// ones. Its records never go through the buffer, so they cannot evict
/// application records.
pub(crate) type ReportHook<R> = Box<dyn FnMut(SelfMetrics) -> Vec<R> + Send>;

/// Messages sent between application threads and the processor's worker thread.
#[derive(Debug)]
enum BatchMessage {
    /// Sent ONLY when buffer occupancy crossed the high-water mark.
    ExportDueToSize(Arc<AtomicBool>),
    /// Drain and export everything buffered, then report back.
    ForceFlush(SyncSender<SdkResult>),
    /// Final drain and export, bounded by the deadline, then exit.
    Shutdown(SyncSender<SdkResult>, Instant),
}

/// The lifecycle phase of a [`BatchProcessor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    /// Waiting for the next trigger.
    Idle,
    /// Collecting observations and draining the buffer.
    Draining,
    /// Handing batches to the exporter.
    Exporting,
    /// Shutdown was requested. Terminal.
    ShuttingDown,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessorState::Idle,
            1 => ProcessorState::Draining,
            2 => ProcessorState::Exporting,
            _ => ProcessorState::ShuttingDown,
        }
    }
}

const SHUTTING_DOWN: u8 = ProcessorState::ShuttingDown as u8;

/// Shared state cell. Once `ShuttingDown` is stored, it sticks.
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> ProcessorState {
        ProcessorState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ProcessorState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != SHUTTING_DOWN).then_some(state as u8)
            });
    }

    fn begin_shutdown(&self) -> bool {
        self.0.swap(SHUTTING_DOWN, Ordering::AcqRel) != SHUTTING_DOWN
    }
}

/// The `BatchProcessor` buffers records and exports them in batches from a
/// **dedicated background thread**.
///
/// An export is triggered every `scheduled_delay`, when the buffer occupancy
/// reaches the high-water mark, or explicitly via [`force_flush`]. Shutdown
/// exports everything still buffered, within `shutdown_timeout`.
///
/// `R` is the record type. The same processor drives both the metrics
/// pipeline ([`Registry`](crate::metrics::Registry)) and the logs pipeline
/// ([`LoggerProvider`](crate::logs::LoggerProvider)).
///
/// [`force_flush`]: BatchProcessor::force_flush
///
/// ### Using a BatchProcessor
///
/// ```rust
/// use beacon_sdk::export::InMemoryExporter;
/// use beacon_sdk::processor::{BatchConfigBuilder, BatchProcessor};
/// use std::time::Duration;
///
/// let exporter = InMemoryExporter::<String>::default();
/// let processor = BatchProcessor::builder(exporter.clone())
///     .with_batch_config(
///         BatchConfigBuilder::default()
///             .with_max_queue_size(2048)
///             .with_max_export_batch_size(512)
///             .with_scheduled_delay(Duration::from_secs(5))
///             .build(),
///     )
///     .build();
///
/// processor.submit("hello".to_string());
/// processor.shutdown().unwrap();
/// assert_eq!(exporter.get_finished_records().unwrap(), vec!["hello".to_string()]);
/// ```
pub struct BatchProcessor<R> {
    buffer: Arc<MeasurementBuffer<R>>,
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    state: Arc<StateCell>,
    stats: Arc<PipelineStats>,
    export_message_sent: Arc<AtomicBool>,
    is_shutdown: AtomicBool,
    // Set once shutdown has taken its final drain of the buffer.
    drained_for_shutdown: AtomicBool,
    submitted_after_shutdown: AtomicBool,
    high_water_mark: usize,
    max_queue_size: usize,
    forceflush_timeout: Duration,
    shutdown_timeout: Duration,
}

impl<R> Debug for BatchProcessor<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("buffer", &self.buffer)
            .field("state", &self.state.get())
            .finish()
    }
}

impl<R> BatchProcessor<R>
where
    R: Send + Sync + 'static,
{
    /// Create a new batch processor builder.
    pub fn builder<E>(exporter: E) -> BatchProcessorBuilder<R, E>
    where
        E: Exporter<R>,
    {
        BatchProcessorBuilder {
            exporter,
            config: Default::default(),
            resource: Resource::empty(),
            _record: PhantomData,
        }
    }

    pub(crate) fn new<E>(
        exporter: E,
        resource: Resource,
        config: BatchConfig,
        stats: Arc<PipelineStats>,
        on_tick: Option<TickHook<R>>,
        on_report: Option<ReportHook<R>>,
    ) -> Self
    where
        E: Exporter<R>,
    {
        let buffer = Arc::new(MeasurementBuffer::new(config.max_queue_size));
        let (message_sender, message_receiver) = mpsc::sync_channel::<BatchMessage>(64);
        let state = Arc::new(StateCell::default());
        let high_water_mark = config.high_water_mark.unwrap_or(config.max_export_batch_size);
        let max_queue_size = config.max_queue_size;
        let shutdown_timeout = config.shutdown_timeout;

        let worker = Worker {
            exporter,
            buffer: buffer.clone(),
            resource,
            config,
            state: state.clone(),
            stats: stats.clone(),
            on_tick,
            on_report,
        };

        let handle = thread::Builder::new()
            .name("Beacon.BatchProcessor".to_string())
            .spawn(move || worker.run(message_receiver));

        let (handle, is_shutdown) = match handle {
            Ok(handle) => (Some(handle), false),
            Err(err) => {
                beacon_error!(
                    name: "BatchProcessor.ThreadSpawnFailed",
                    error = err.to_string()
                );
                state.begin_shutdown();
                (None, true)
            }
        };

        BatchProcessor {
            buffer,
            message_sender,
            handle: Mutex::new(handle),
            state,
            stats,
            export_message_sent: Arc::new(AtomicBool::new(false)),
            is_shutdown: AtomicBool::new(is_shutdown),
            drained_for_shutdown: AtomicBool::new(false),
            submitted_after_shutdown: AtomicBool::new(false),
            high_water_mark,
            max_queue_size,
            forceflush_timeout: shutdown_timeout,
            shutdown_timeout,
        }
    }

    /// Appends a record to the buffer. Never blocks.
    ///
    /// Records submitted after [`shutdown`](Self::shutdown) are counted as
    /// dropped.
    pub fn submit(&self, record: R) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.stats.record_dropped(1);
            if !self.submitted_after_shutdown.swap(true, Ordering::Relaxed) {
                beacon_warn!(
                    name: "BatchProcessor.Submit.AfterShutdown",
                    message = "Records are being submitted after shutdown. They will not be exported."
                );
            }
            return;
        }
        self.enqueue(record);
    }

    /// Appends a record that passed the shutdown check.
    ///
    /// A producer can pass that check just before `shutdown` starts, then
    /// append after its last drain. Such a record is drained here and counted
    /// as dropped rather than left in the buffer.
    fn enqueue(&self, record: R) {
        let occupancy = self.buffer.append(record);
        // Pairs with the fence in `shutdown`: either its final drain sees this
        // record, or this load sees the flag.
        fence(Ordering::SeqCst);
        if self.drained_for_shutdown.load(Ordering::Relaxed) {
            self.stats.record_dropped(self.buffer.drain_all().len() as u64);
            return;
        }

        if occupancy >= self.high_water_mark
            // Cheap load first, the swap needs exclusive access to the cache line.
            && !self.export_message_sent.load(Ordering::Relaxed)
            && !self.export_message_sent.swap(true, Ordering::Relaxed)
        {
            let message = BatchMessage::ExportDueToSize(self.export_message_sent.clone());
            if self.message_sender.try_send(message).is_err() {
                self.export_message_sent.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Exports everything currently buffered and waits for the exporter.
    ///
    /// Runs the export on the worker thread. Returns
    /// [`SdkError::Timeout`] if the worker does not finish within the
    /// shutdown timeout.
    pub fn force_flush(&self) -> SdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self
            .message_sender
            .try_send(BatchMessage::ForceFlush(sender))
        {
            Ok(_) => receiver
                .recv_timeout(self.forceflush_timeout)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => SdkError::Timeout(self.forceflush_timeout),
                    RecvTimeoutError::Disconnected => SdkError::InternalFailure(err.to_string()),
                })?,
            Err(mpsc::TrySendError::Full(_)) => {
                beacon_debug!(name: "BatchProcessor.ForceFlush.ControlChannelFull");
                Err(SdkError::InternalFailure(
                    "force_flush cannot be performed as the control channel is full".into(),
                ))
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                beacon_debug!(name: "BatchProcessor.ForceFlush.AlreadyShutdown");
                Err(SdkError::AlreadyShutdown)
            }
        }
    }

    /// Performs a final export of everything buffered and stops the worker.
    ///
    /// Records that cannot be exported within the shutdown timeout are
    /// discarded and counted as dropped. The exporter's own `shutdown` is
    /// invoked afterwards. A second call returns [`SdkError::AlreadyShutdown`].
    pub fn shutdown(&self) -> SdkResult {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            beacon_debug!(name: "BatchProcessor.Shutdown.AlreadyShutdown");
            return Err(SdkError::AlreadyShutdown);
        }
        self.state.begin_shutdown();

        let deadline = Instant::now() + self.shutdown_timeout;
        let (sender, receiver) = mpsc::sync_channel(1);
        let result = match self
            .message_sender
            .try_send(BatchMessage::Shutdown(sender, deadline))
        {
            Ok(_) => match receiver.recv_timeout(self.shutdown_timeout) {
                Ok(result) => {
                    if let Some(handle) = self.handle.lock()?.take() {
                        let _ = handle.join();
                    }
                    result
                }
                Err(RecvTimeoutError::Timeout) => {
                    beacon_error!(
                        name: "BatchProcessor.Shutdown.Timeout",
                        message = "BatchProcessor shutdown timing out."
                    );
                    Err(SdkError::Timeout(self.shutdown_timeout))
                }
                Err(err) => Err(SdkError::InternalFailure(err.to_string())),
            },
            Err(err) => Err(SdkError::InternalFailure(err.to_string())),
        };

        // Producers that raced with the final drain.
        self.drained_for_shutdown.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let stragglers = self.buffer.drain_all().len() as u64;
        self.stats.record_dropped(stragglers);

        let dropped = self.self_metrics().dropped_records_total;
        if dropped > 0 {
            beacon_warn!(
                name: "BatchProcessor.RecordsDropped",
                dropped_records_count = dropped,
                max_queue_size = self.max_queue_size,
                message = "Records were dropped. The count is the total for the lifetime of this processor. Consider increasing the queue size or decreasing the export interval."
            );
        }
        result
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ProcessorState {
        self.state.get()
    }

    /// Snapshot of the pipeline's own counters.
    pub fn self_metrics(&self) -> SelfMetrics {
        self.stats.snapshot(self.buffer.dropped())
    }

    pub(crate) fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}

/// Everything the worker thread owns.
struct Worker<R, E> {
    exporter: E,
    buffer: Arc<MeasurementBuffer<R>>,
    resource: Resource,
    config: BatchConfig,
    state: Arc<StateCell>,
    stats: Arc<PipelineStats>,
    on_tick: Option<TickHook<R>>,
    on_report: Option<ReportHook<R>>,
}

impl<R, E> Worker<R, E>
where
    R: Send + Sync + 'static,
    E: Exporter<R>,
{
    fn run(mut self, message_receiver: mpsc::Receiver<BatchMessage>) {
        let _suppress_guard = SuppressionContext::attach();
        beacon_debug!(
            name: "BatchProcessor.ThreadStarted",
            interval_in_millisecs = self.config.scheduled_delay.as_millis() as u64,
            max_export_batch_size = self.config.max_export_batch_size,
            max_queue_size = self.config.max_queue_size
        );
        let mut last_export_time = Instant::now();

        loop {
            let remaining_time = self
                .config
                .scheduled_delay
                .checked_sub(last_export_time.elapsed())
                .unwrap_or(Duration::ZERO);

            match message_receiver.recv_timeout(remaining_time) {
                Ok(BatchMessage::ExportDueToSize(export_message_sent)) => {
                    // Reset the flag now the message has been processed.
                    export_message_sent.store(false, Ordering::Relaxed);
                    beacon_debug!(name: "BatchProcessor.ExportingDueToBatchSize");
                    let _ = self.collect_and_export(None);
                    last_export_time = Instant::now();
                }
                Ok(BatchMessage::ForceFlush(sender)) => {
                    beacon_debug!(name: "BatchProcessor.ExportingDueToForceFlush");
                    let result = self.collect_and_export(None);
                    last_export_time = Instant::now();
                    let _ = sender.send(result);
                }
                Ok(BatchMessage::Shutdown(sender, deadline)) => {
                    beacon_debug!(name: "BatchProcessor.ExportingDueToShutdown");
                    let result = self.collect_and_export(Some(deadline));
                    if let Err(err) = self.exporter.shutdown() {
                        beacon_debug!(
                            name: "BatchProcessor.ExporterShutdownFailed",
                            error = err.to_string()
                        );
                    }
                    let _ = sender.send(result);
                    beacon_debug!(
                        name: "BatchProcessor.ThreadExiting",
                        reason = "ShutdownRequested"
                    );
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    beacon_debug!(name: "BatchProcessor.ExportingDueToTimer");
                    let _ = self.collect_and_export(None);
                    last_export_time = Instant::now();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    beacon_debug!(
                        name: "BatchProcessor.ThreadExiting",
                        reason = "MessageSenderDisconnected"
                    );
                    break;
                }
            }
        }
        beacon_debug!(name: "BatchProcessor.ThreadStopped");
    }

    /// Runs the tick hook, drains the buffer, appends the report hook's records
    /// and exports everything in batches.
    ///
    /// With a deadline, batches not started before it passes are discarded.
    fn collect_and_export(&mut self, deadline: Option<Instant>) -> SdkResult {
        self.state.set(ProcessorState::Draining);
        if let Some(on_tick) = self.on_tick.as_mut() {
            on_tick(&self.buffer);
        }
        let mut pending = self.buffer.drain_all();
        if let Some(on_report) = self.on_report.as_mut() {
            pending.extend(on_report(self.stats.snapshot(self.buffer.dropped())));
        }
        if pending.is_empty() {
            self.state.set(ProcessorState::Idle);
            return Ok(());
        }

        self.state.set(ProcessorState::Exporting);
        let mut failed_batches = 0usize;
        let mut result = Ok(());
        while !pending.is_empty() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let discarded = pending.len();
                self.stats.record_dropped(discarded as u64);
                beacon_warn!(
                    name: "BatchProcessor.DeadlineExceeded",
                    discarded_records = discarded
                );
                result = Err(SdkError::Timeout(self.config.shutdown_timeout));
                break;
            }

            let rest = if pending.len() > self.config.max_export_batch_size {
                pending.split_off(self.config.max_export_batch_size)
            } else {
                Vec::new()
            };
            let batch = ExportBatch::new(self.resource.clone(), pending);
            pending = rest;

            match self.export_batch(&batch, deadline) {
                Ok(()) => self.stats.record_exported(batch.len() as u64),
                Err(err) => {
                    failed_batches += 1;
                    self.stats.record_export_failure();
                    beacon_error!(
                        name: "BatchProcessor.ExportError",
                        batch_size = batch.len(),
                        error = err.to_string()
                    );
                }
            }
        }

        self.state.set(ProcessorState::Idle);
        if result.is_ok() && failed_batches > 0 {
            result = Err(SdkError::InternalFailure(format!(
                "{failed_batches} batch(es) failed to export"
            )));
        }
        result
    }

    fn export_batch(&self, batch: &ExportBatch<R>, deadline: Option<Instant>) -> ExportResult {
        retry_with_backoff(
            &self.config.retry_policy,
            "BatchProcessor.Export",
            deadline,
            |_| futures_executor::block_on(self.exporter.export(batch)),
        )
    }
}

///
/// A builder for creating [`BatchProcessor`] instances.
///
#[derive(Debug)]
pub struct BatchProcessorBuilder<R, E> {
    exporter: E,
    config: BatchConfig,
    resource: Resource,
    _record: PhantomData<fn(R)>,
}

impl<R, E> BatchProcessorBuilder<R, E>
where
    R: Send + Sync + 'static,
    E: Exporter<R>,
{
    /// Set the [`BatchConfig`] for [`BatchProcessorBuilder`].
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchProcessorBuilder { config, ..self }
    }

    /// Set the resource attached to every exported batch.
    pub fn with_resource(self, resource: Resource) -> Self {
        BatchProcessorBuilder { resource, ..self }
    }

    /// Build a batch processor. This spawns the worker thread.
    pub fn build(self) -> BatchProcessor<R> {
        BatchProcessor::new(
            self.exporter,
            self.resource,
            self.config,
            Arc::new(PipelineStats::default()),
            None,
            None,
        )
    }
}

/// Batch processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance of [`BatchConfig`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// The maximum number of records buffered between exports. When the buffer
    /// is full the oldest records are dropped. The default value is 2048.
    pub(crate) max_queue_size: usize,

    /// The delay between two consecutive export cycles. The default value is
    /// 5 seconds.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of records in a single export call. Larger drains are
    /// exported as several batches, one after the other. The default value is
    /// 512.
    pub(crate) max_export_batch_size: usize,

    /// Buffer occupancy that triggers an export before the timer fires.
    /// Defaults to `max_export_batch_size`.
    pub(crate) high_water_mark: Option<usize>,

    /// The deadline for the final export on shutdown. The default value is
    /// 5 seconds.
    pub(crate) shutdown_timeout: Duration,

    /// How failed exports are retried.
    pub(crate) retry_policy: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

impl BatchConfig {
    /// The maximum number of records buffered between exports.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// The delay between two consecutive export cycles.
    pub fn scheduled_delay(&self) -> Duration {
        self.scheduled_delay
    }

    /// The maximum number of records in a single export call.
    pub fn max_export_batch_size(&self) -> usize {
        self.max_export_batch_size
    }

    /// The deadline for the final export on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// How failed exports are retried.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    high_water_mark: Option<usize>,
    shutdown_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl Default for BatchConfigBuilder {
    /// Create a new [`BatchConfigBuilder`] initialized with default values.
    /// The values are overridden by environment variables if set.
    /// The supported environment variables are:
    /// * `BEACON_MAX_QUEUE_SIZE`
    /// * `BEACON_EXPORT_INTERVAL`
    /// * `BEACON_MAX_EXPORT_BATCH_SIZE`
    /// * `BEACON_SHUTDOWN_TIMEOUT`
    ///
    /// Note: Programmatic configuration overrides any value set via the environment variable.
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: BEACON_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: BEACON_EXPORT_INTERVAL_DEFAULT,
            max_export_batch_size: BEACON_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            high_water_mark: None,
            shutdown_timeout: BEACON_SHUTDOWN_TIMEOUT_DEFAULT,
            retry_policy: RetryPolicy::default(),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Set max_queue_size for [`BatchConfigBuilder`].
    /// It's the maximum number of records buffered between exports.
    /// The default value is 2048.
    ///
    /// Corresponding environment variable: `BEACON_MAX_QUEUE_SIZE`.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set scheduled_delay for [`BatchConfigBuilder`].
    /// It's the delay between two consecutive export cycles.
    /// The default value is 5000 milliseconds.
    ///
    /// Corresponding environment variable: `BEACON_EXPORT_INTERVAL`.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set max_export_batch_size for [`BatchConfigBuilder`].
    /// It's the maximum number of records in a single export call.
    /// The default value is 512.
    ///
    /// Corresponding environment variable: `BEACON_MAX_EXPORT_BATCH_SIZE`.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Set the buffer occupancy that triggers an early export.
    /// Defaults to the max export batch size.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    /// Set shutdown_timeout for [`BatchConfigBuilder`].
    /// It bounds the final export on shutdown.
    /// The default value is 5000 milliseconds.
    ///
    /// Corresponding environment variable: `BEACON_SHUTDOWN_TIMEOUT`.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Set the total number of attempts made for each batch. The default is 3.
    pub fn with_max_export_attempts(mut self, max_attempts: usize) -> Self {
        self.retry_policy.max_attempts = max_attempts;
        self
    }

    /// Replace the whole retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Builds a `BatchConfig` enforcing the following invariants:
    /// * `max_queue_size` is at least 1.
    /// * `max_export_batch_size` is at least 1 and at most `max_queue_size`.
    pub fn build(self) -> BatchConfig {
        let max_queue_size = self.max_queue_size.max(1);
        let max_export_batch_size = min(self.max_export_batch_size, max_queue_size).max(1);

        BatchConfig {
            max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size,
            high_water_mark: self.high_water_mark,
            shutdown_timeout: self.shutdown_timeout,
            retry_policy: self.retry_policy,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = env::var(BEACON_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        if let Some(max_export_batch_size) = env::var(BEACON_MAX_EXPORT_BATCH_SIZE)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.max_export_batch_size = max_export_batch_size;
        }

        if let Some(scheduled_delay) = env::var(BEACON_EXPORT_INTERVAL)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(shutdown_timeout) = env::var(BEACON_SHUTDOWN_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            self.shutdown_timeout = Duration::from_millis(shutdown_timeout);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportError, InMemoryExporter};
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;

    const ALL_ENV_VARS: [&str; 4] = [
        BEACON_EXPORT_INTERVAL,
        BEACON_MAX_QUEUE_SIZE,
        BEACON_MAX_EXPORT_BATCH_SIZE,
        BEACON_SHUTDOWN_TIMEOUT,
    ];

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::from_millis(1),
        }
    }

    fn quiet_config() -> BatchConfigBuilder {
        temp_env::with_vars_unset(ALL_ENV_VARS, BatchConfigBuilder::default)
            .with_scheduled_delay(Duration::from_secs(3600))
            .with_retry_policy(fast_retry())
    }

    /// Fails a fixed number of times, then acknowledges.
    #[derive(Debug, Clone)]
    struct FlakyExporter {
        failures_left: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
        permanent: bool,
        inner: InMemoryExporter<u32>,
    }

    impl FlakyExporter {
        fn new(failures: usize, permanent: bool) -> Self {
            FlakyExporter {
                failures_left: Arc::new(AtomicUsize::new(failures)),
                calls: Arc::new(AtomicUsize::new(0)),
                permanent,
                inner: InMemoryExporter::default(),
            }
        }
    }

    impl Exporter<u32> for FlakyExporter {
        #[allow(clippy::manual_async_fn)]
        fn export(&self, batch: &ExportBatch<u32>) -> impl Future<Output = ExportResult> + Send {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let failing = self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(if self.permanent {
                        ExportError::Permanent("rejected".into())
                    } else {
                        ExportError::Transient("unavailable".into())
                    });
                }
                self.inner.export(batch).await
            }
        }
    }

    /// Blocks every export for a fixed time.
    #[derive(Debug)]
    struct SlowExporter(Duration);

    impl Exporter<u32> for SlowExporter {
        #[allow(clippy::manual_async_fn)]
        fn export(&self, _batch: &ExportBatch<u32>) -> impl Future<Output = ExportResult> + Send {
            async move {
                thread::sleep(self.0);
                Ok(())
            }
        }
    }

    #[test]
    fn test_default_const_values() {
        assert_eq!(BEACON_EXPORT_INTERVAL, "BEACON_EXPORT_INTERVAL");
        assert_eq!(BEACON_EXPORT_INTERVAL_DEFAULT.as_millis(), 5_000);
        assert_eq!(BEACON_MAX_QUEUE_SIZE, "BEACON_MAX_QUEUE_SIZE");
        assert_eq!(BEACON_MAX_QUEUE_SIZE_DEFAULT, 2_048);
        assert_eq!(BEACON_MAX_EXPORT_BATCH_SIZE, "BEACON_MAX_EXPORT_BATCH_SIZE");
        assert_eq!(BEACON_MAX_EXPORT_BATCH_SIZE_DEFAULT, 512);
        assert_eq!(BEACON_SHUTDOWN_TIMEOUT_DEFAULT.as_millis(), 5_000);
    }

    #[test]
    fn test_default_batch_config() {
        let config = temp_env::with_vars_unset(ALL_ENV_VARS, BatchConfig::default);

        assert_eq!(config.scheduled_delay, BEACON_EXPORT_INTERVAL_DEFAULT);
        assert_eq!(config.max_queue_size, BEACON_MAX_QUEUE_SIZE_DEFAULT);
        assert_eq!(config.max_export_batch_size, BEACON_MAX_EXPORT_BATCH_SIZE_DEFAULT);
        assert_eq!(config.shutdown_timeout, BEACON_SHUTDOWN_TIMEOUT_DEFAULT);
        assert_eq!(config.high_water_mark, None);
        assert_eq!(config.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn test_batch_config_configurable_by_env_vars() {
        let env_vars = vec![
            (BEACON_EXPORT_INTERVAL, Some("2000")),
            (BEACON_MAX_QUEUE_SIZE, Some("4096")),
            (BEACON_MAX_EXPORT_BATCH_SIZE, Some("1024")),
            (BEACON_SHUTDOWN_TIMEOUT, Some("750")),
        ];

        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.scheduled_delay, Duration::from_millis(2000));
        assert_eq!(config.max_queue_size, 4096);
        assert_eq!(config.max_export_batch_size, 1024);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_code_based_config_overrides_env_vars() {
        let env_vars = vec![
            (BEACON_EXPORT_INTERVAL, Some("2000")),
            (BEACON_MAX_QUEUE_SIZE, Some("4096")),
            (BEACON_MAX_EXPORT_BATCH_SIZE, Some("1024")),
        ];

        temp_env::with_vars(env_vars, || {
            let config = BatchConfigBuilder::default()
                .with_max_queue_size(2048)
                .with_scheduled_delay(Duration::from_millis(1000))
                .with_max_export_batch_size(512)
                .build();

            assert_eq!(config.scheduled_delay, Duration::from_millis(1000));
            assert_eq!(config.max_queue_size, 2048);
            assert_eq!(config.max_export_batch_size, 512);
        });
    }

    #[test]
    fn test_batch_config_max_export_batch_size_validation() {
        let env_vars = vec![
            (BEACON_MAX_QUEUE_SIZE, Some("256")),
            (BEACON_MAX_EXPORT_BATCH_SIZE, Some("1024")),
        ];

        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.max_queue_size, 256);
        assert_eq!(config.max_export_batch_size, 256);
    }

    #[test]
    fn test_invalid_env_value_falls_back_to_default() {
        let config = temp_env::with_vars(
            vec![(BEACON_EXPORT_INTERVAL, Some("I am not number"))],
            BatchConfig::default,
        );
        assert_eq!(config.scheduled_delay, BEACON_EXPORT_INTERVAL_DEFAULT);
    }

    #[test]
    fn shutdown_flushes_everything_once() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().build())
            .build();

        for i in 0..100u32 {
            processor.submit(i);
        }
        let start = Instant::now();
        processor.shutdown().unwrap();
        assert!(start.elapsed() < BEACON_SHUTDOWN_TIMEOUT_DEFAULT);

        let records = exporter.get_finished_records().unwrap();
        assert_eq!(records, (0..100).collect::<Vec<_>>());
        assert!(exporter.is_shutdown_called());
        assert_eq!(processor.state(), ProcessorState::ShuttingDown);
        assert_eq!(processor.self_metrics().exported_records_total, 100);
    }

    #[test]
    fn second_shutdown_is_rejected() {
        let processor = BatchProcessor::builder(InMemoryExporter::<u32>::default())
            .with_batch_config(quiet_config().build())
            .build();
        assert!(processor.shutdown().is_ok());
        assert!(matches!(processor.shutdown(), Err(SdkError::AlreadyShutdown)));
        assert!(matches!(processor.force_flush(), Err(SdkError::AlreadyShutdown)));
    }

    #[test]
    fn submit_after_shutdown_counts_as_dropped() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().build())
            .build();
        processor.shutdown().unwrap();

        processor.submit(1u32);
        processor.submit(2u32);

        assert_eq!(processor.self_metrics().dropped_records_total, 2);
        assert!(exporter.get_finished_records().unwrap().is_empty());
    }

    #[test]
    fn splits_drain_into_batches() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(
                quiet_config()
                    .with_max_export_batch_size(4)
                    .with_high_water_mark(usize::MAX)
                    .build(),
            )
            .build();

        for i in 0..10u32 {
            processor.submit(i);
        }
        processor.force_flush().unwrap();

        let sizes: Vec<usize> = exporter
            .get_finished_batches()
            .unwrap()
            .iter()
            .map(|batch| batch.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(exporter.get_finished_records().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn high_water_mark_triggers_export() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().with_max_export_batch_size(5).build())
            .build();

        for i in 0..5u32 {
            processor.submit(i);
        }

        let start = Instant::now();
        while exporter.get_finished_records().unwrap().len() < 5 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(exporter.get_finished_records().unwrap().len(), 5);
    }

    #[test]
    fn timer_triggers_export() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(
                quiet_config()
                    .with_scheduled_delay(Duration::from_millis(20))
                    .build(),
            )
            .build();

        processor.submit(7u32);

        let start = Instant::now();
        while exporter.get_finished_records().unwrap().is_empty() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(exporter.get_finished_records().unwrap(), vec![7]);
    }

    #[test]
    fn transient_failures_are_retried() {
        let exporter = FlakyExporter::new(2, false);
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().build())
            .build();

        processor.submit(42);
        processor.force_flush().unwrap();

        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(exporter.inner.get_finished_records().unwrap(), vec![42]);
        assert_eq!(processor.self_metrics().export_failures_total, 0);
    }

    #[test]
    fn exhausted_retries_drop_batch() {
        let exporter = FlakyExporter::new(usize::MAX, false);
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().build())
            .build();

        processor.submit(1);
        assert!(matches!(
            processor.force_flush(),
            Err(SdkError::InternalFailure(_))
        ));

        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(processor.self_metrics().export_failures_total, 1);
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn permanent_failure_not_retried() {
        let exporter = FlakyExporter::new(1, true);
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().build())
            .build();

        processor.submit(1);
        let _ = processor.force_flush();

        assert_eq!(exporter.calls.load(Ordering::SeqCst), 1);
        assert!(exporter.inner.get_finished_records().unwrap().is_empty());
        assert_eq!(processor.self_metrics().export_failures_total, 1);
    }

    #[test]
    fn shutdown_deadline_discards_remaining_batches() {
        let processor = BatchProcessor::builder(SlowExporter(Duration::from_millis(100)))
            .with_batch_config(
                quiet_config()
                    .with_max_export_batch_size(1)
                    .with_high_water_mark(usize::MAX)
                    .with_shutdown_timeout(Duration::from_millis(250))
                    .build(),
            )
            .build();

        for i in 0..10u32 {
            processor.submit(i);
        }
        let result = processor.shutdown();

        let metrics = processor.self_metrics();
        assert!(result.is_err());
        assert!(metrics.exported_records_total < 10);
        assert!(metrics.exported_records_total >= 1);
    }

    #[test]
    fn tick_hook_runs_before_drain() {
        let exporter = InMemoryExporter::<u32>::default();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_for_hook = ticks.clone();
        let processor = BatchProcessor::new(
            exporter.clone(),
            Resource::empty(),
            quiet_config().build(),
            Arc::new(PipelineStats::default()),
            Some(Box::new(move |buffer: &MeasurementBuffer<u32>| {
                let tick = ticks_for_hook.fetch_add(1, Ordering::SeqCst) as u32;
                buffer.append(100 + tick);
            })),
            None,
        );

        processor.force_flush().unwrap();
        processor.shutdown().unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(exporter.get_finished_records().unwrap(), vec![100, 101]);
    }

    #[test]
    fn overflow_counted_in_self_metrics() {
        let processor = BatchProcessor::builder(InMemoryExporter::<u32>::default())
            .with_batch_config(
                quiet_config()
                    .with_max_queue_size(10)
                    .with_high_water_mark(usize::MAX)
                    .build(),
            )
            .build();

        for i in 0..15u32 {
            processor.submit(i);
        }
        assert_eq!(processor.self_metrics().dropped_records_total, 5);
    }

    #[test]
    fn report_hook_records_bypass_the_buffer() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::new(
            exporter.clone(),
            Resource::empty(),
            quiet_config()
                .with_max_queue_size(2)
                .with_high_water_mark(usize::MAX)
                .build(),
            Arc::new(PipelineStats::default()),
            None,
            Some(Box::new(|metrics: SelfMetrics| {
                vec![1000 + metrics.dropped_records_total as u32]
            })),
        );

        for i in 0..3u32 {
            processor.submit(i);
        }
        processor.force_flush().unwrap();

        // 0 was evicted; the report rides along without evicting 1 or 2
        assert_eq!(exporter.get_finished_records().unwrap(), vec![1, 2, 1001]);
        processor.shutdown().unwrap();
    }

    #[test]
    fn append_racing_the_final_drain_is_counted_as_dropped() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = BatchProcessor::builder(exporter.clone())
            .with_batch_config(quiet_config().build())
            .build();
        processor.submit(1);
        processor.shutdown().unwrap();

        // a producer that passed the shutdown check before it started
        processor.enqueue(2);

        assert!(processor.buffer.is_empty());
        assert_eq!(exporter.get_finished_records().unwrap(), vec![1]);
        let metrics = processor.self_metrics();
        assert_eq!(metrics.exported_records_total, 1);
        assert_eq!(metrics.dropped_records_total, 1);
    }

    #[test]
    fn records_submitted_during_shutdown_are_exported_or_dropped() {
        let exporter = InMemoryExporter::<u32>::default();
        let processor = Arc::new(
            BatchProcessor::builder(exporter.clone())
                .with_batch_config(quiet_config().with_max_queue_size(100_000).build())
                .build(),
        );

        let producers: Vec<_> = (0..4u32)
            .map(|t| {
                let processor = processor.clone();
                thread::spawn(move || {
                    for i in 0..5_000u32 {
                        processor.submit(t * 5_000 + i);
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(2));
        processor.shutdown().unwrap();
        for producer in producers {
            producer.join().unwrap();
        }

        let metrics = processor.self_metrics();
        assert_eq!(
            metrics.exported_records_total + metrics.dropped_records_total,
            20_000
        );
        assert!(processor.buffer.is_empty());
    }
}
