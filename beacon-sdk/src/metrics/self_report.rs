use crate::attributes::AttributeSet;
use crate::metrics::{InstrumentDescriptor, InstrumentKind, MeasurementRecord};
use crate::self_metrics::{
    SelfMetrics, CALLBACK_FAILURES_TOTAL, DROPPED_RECORDS_TOTAL, EXPORT_FAILURES_TOTAL,
};
use std::sync::Arc;
use std::time::SystemTime;

/// Turns the pipeline's loss counters into counter records, so they reach
/// the collector alongside application metrics.
///
/// Counters are exported as deltas like any other counter: each tick emits
/// the growth since the previous tick, and nothing when a counter did not
/// move. `telemetry_exported_records_total` is left out because exporting it
/// would change it.
pub(crate) struct SelfMetricsReporter {
    dropped_records: Arc<InstrumentDescriptor>,
    export_failures: Arc<InstrumentDescriptor>,
    callback_failures: Arc<InstrumentDescriptor>,
    last: SelfMetrics,
}

impl SelfMetricsReporter {
    pub(crate) fn new() -> Self {
        let counter = |name: &'static str, description: &'static str| {
            Arc::new(
                InstrumentDescriptor::new(name, InstrumentKind::Counter)
                    .with_description(description),
            )
        };
        SelfMetricsReporter {
            dropped_records: counter(
                DROPPED_RECORDS_TOTAL,
                "Records lost to overflow, shutdown deadlines or recording after shutdown",
            ),
            export_failures: counter(
                EXPORT_FAILURES_TOTAL,
                "Batches dropped after the exporter gave up",
            ),
            callback_failures: counter(
                CALLBACK_FAILURES_TOTAL,
                "Observable callbacks that timed out or panicked",
            ),
            last: SelfMetrics::default(),
        }
    }

    /// The descriptors reported on, so the registry can reserve their names.
    pub(crate) fn descriptors(&self) -> [Arc<InstrumentDescriptor>; 3] {
        [
            self.dropped_records.clone(),
            self.export_failures.clone(),
            self.callback_failures.clone(),
        ]
    }

    pub(crate) fn report(&mut self, current: SelfMetrics) -> Vec<MeasurementRecord> {
        let now = SystemTime::now();
        let deltas = [
            (
                &self.dropped_records,
                current.dropped_records_total - self.last.dropped_records_total,
            ),
            (
                &self.export_failures,
                current.export_failures_total - self.last.export_failures_total,
            ),
            (
                &self.callback_failures,
                current.callback_failures_total - self.last.callback_failures_total,
            ),
        ];
        let records = deltas
            .into_iter()
            .filter(|(_, delta)| *delta > 0)
            .map(|(descriptor, delta)| {
                MeasurementRecord::new(
                    descriptor.clone(),
                    AttributeSet::from(Vec::new()),
                    delta as f64,
                    now,
                )
            })
            .collect();
        self.last = current;
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_counters_that_moved() {
        let mut reporter = SelfMetricsReporter::new();
        assert!(reporter.report(SelfMetrics::default()).is_empty());

        let records = reporter.report(SelfMetrics {
            dropped_records_total: 4,
            exported_records_total: 100,
            ..Default::default()
        });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), DROPPED_RECORDS_TOTAL);
        assert_eq!(records[0].kind(), InstrumentKind::Counter);
        assert_eq!(records[0].value(), 4.0);
    }

    #[test]
    fn reports_growth_since_the_previous_tick() {
        let mut reporter = SelfMetricsReporter::new();
        reporter.report(SelfMetrics {
            dropped_records_total: 4,
            export_failures_total: 1,
            ..Default::default()
        });

        let records = reporter.report(SelfMetrics {
            dropped_records_total: 10,
            export_failures_total: 1,
            callback_failures_total: 2,
            ..Default::default()
        });
        let by_name: Vec<_> = records.iter().map(|r| (r.name(), r.value())).collect();
        assert_eq!(
            by_name,
            vec![(DROPPED_RECORDS_TOTAL, 6.0), (CALLBACK_FAILURES_TOTAL, 2.0)]
        );
    }
}
