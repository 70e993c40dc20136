use crate::attributes::{AttributeSet, KeyValue};
use crate::buffer::MeasurementBuffer;
use crate::metrics::{InstrumentDescriptor, MeasurementRecord};
use crate::self_metrics::PipelineStats;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Default budget for all observable callbacks of one export tick.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// A value reported by an observable gauge callback.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    value: f64,
    attributes: AttributeSet,
}

impl Observation {
    /// Create an observation of `value` for `attributes`.
    pub fn new(value: f64, attributes: &[KeyValue]) -> Self {
        Observation {
            value,
            attributes: attributes.into(),
        }
    }

    /// The observed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The attributes of the observed series.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }
}

type Callback = dyn Fn() -> Vec<Observation> + Send + Sync;

struct RegisteredCallback {
    instrument: Arc<InstrumentDescriptor>,
    callback: Arc<Callback>,
    // Set while an invocation is running, including one that timed out and
    // is still stuck on its thread.
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the invocation thread ends, even by panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Every callback registered on a registry's observable gauges.
///
/// [`collect`](Self::collect) runs on the batch processor's worker thread at
/// the start of each export cycle.
pub(crate) struct ObserverSet {
    callbacks: Mutex<Vec<RegisteredCallback>>,
    timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ObserverSet {
    pub(crate) fn new(timeout: Duration, stats: Arc<PipelineStats>) -> Self {
        ObserverSet {
            callbacks: Mutex::new(Vec::new()),
            timeout,
            stats,
        }
    }

    pub(crate) fn register(
        &self,
        instrument: Arc<InstrumentDescriptor>,
        callback: Arc<Callback>,
    ) -> Result<(), crate::metrics::MetricError> {
        self.callbacks.lock()?.push(RegisteredCallback {
            instrument,
            callback,
            in_flight: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }

    /// Invokes every callback and appends its finite observations to `buffer`.
    ///
    /// All callbacks share one budget of `timeout`. A callback that panics,
    /// overruns the budget, or is still running from an earlier tick counts
    /// as one callback failure and contributes nothing to this tick.
    pub(crate) fn collect(&self, buffer: &MeasurementBuffer<MeasurementRecord>) {
        let pending = match self.callbacks.lock() {
            Ok(callbacks) => callbacks
                .iter()
                .filter_map(|registered| self.start(registered))
                .collect::<Vec<_>>(),
            Err(err) => {
                beacon_error!(
                    name: "ObservableGauge.CallbacksUnavailable",
                    error = err.to_string()
                );
                return;
            }
        };

        let deadline = Instant::now() + self.timeout;
        for (instrument, receiver) in pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(Ok(observations)) => {
                    let timestamp = SystemTime::now();
                    for observation in observations {
                        if !observation.value.is_finite() {
                            beacon_debug!(
                                name: "ObservableGauge.NonFiniteObservationSkipped",
                                instrument = instrument.name().to_string()
                            );
                            continue;
                        }
                        buffer.append(MeasurementRecord::new(
                            instrument.clone(),
                            observation.attributes,
                            observation.value,
                            timestamp,
                        ));
                    }
                }
                Ok(Err(())) | Err(RecvTimeoutError::Disconnected) => {
                    self.stats.record_callback_failure();
                    beacon_warn!(
                        name: "ObservableGauge.CallbackPanicked",
                        instrument = instrument.name().to_string()
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.stats.record_callback_failure();
                    beacon_warn!(
                        name: "ObservableGauge.CallbackTimedOut",
                        instrument = instrument.name().to_string(),
                        timeout_in_millisecs = self.timeout.as_millis() as u64
                    );
                }
            }
        }
    }

    /// Spawns one invocation. Returns `None` if it could not start.
    #[allow(clippy::type_complexity)]
    fn start(
        &self,
        registered: &RegisteredCallback,
    ) -> Option<(
        Arc<InstrumentDescriptor>,
        mpsc::Receiver<Result<Vec<Observation>, ()>>,
    )> {
        if registered.in_flight.swap(true, Ordering::AcqRel) {
            self.stats.record_callback_failure();
            beacon_warn!(
                name: "ObservableGauge.CallbackStillRunning",
                instrument = registered.instrument.name().to_string()
            );
            return None;
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        let callback = registered.callback.clone();
        let guard = InFlightGuard(registered.in_flight.clone());
        let spawned = thread::Builder::new()
            .name("Beacon.ObservableCallback".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = panic::catch_unwind(AssertUnwindSafe(|| callback())).map_err(|_| ());
                let _ = sender.send(result);
            });

        match spawned {
            Ok(_) => Some((registered.instrument.clone(), receiver)),
            Err(err) => {
                // The closure, and with it the guard, was dropped.
                self.stats.record_callback_failure();
                beacon_error!(
                    name: "ObservableGauge.CallbackSpawnFailed",
                    error = err.to_string()
                );
                None
            }
        }
    }
}
