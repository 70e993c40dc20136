//! The bounded queue that sits between recording calls and the batch processor.
//!
//! Appending never blocks and never fails: when the buffer is full the oldest
//! record is evicted to make room, and the eviction is counted. Telemetry must
//! not apply backpressure to the code it observes.
use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of records a buffer holds before it starts dropping the oldest.
pub const DEFAULT_CAPACITY: usize = 2_048;

/// A bounded, lock-free, multi-producer queue of pending records.
///
/// Producers call [`append`](Self::append) from any thread. The single consumer
/// (the batch processor) calls [`drain_all`](Self::drain_all).
pub struct MeasurementBuffer<R> {
    queue: ArrayQueue<R>,
    dropped: AtomicU64,
}

impl<R> MeasurementBuffer<R> {
    /// Creates a buffer holding at most `capacity` records.
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        MeasurementBuffer {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends a record, evicting the oldest one if the buffer is full.
    ///
    /// Returns the occupancy after the append, which callers use to decide
    /// whether a high-water mark has been crossed.
    pub fn append(&self, record: R) -> usize {
        if self.queue.force_push(record).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.queue.len()
    }

    /// Removes and returns every record present when the drain started, oldest first.
    ///
    /// Records appended concurrently with the drain may land in this drain or
    /// the next one, never in both.
    pub fn drain_all(&self) -> Vec<R> {
        let pending = self.queue.len();
        let mut records = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.queue.pop() {
                Some(record) => records.push(record),
                None => break,
            }
        }
        records
    }

    /// Number of records currently buffered.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of records the buffer holds.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Total number of records evicted because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<R> fmt::Debug for MeasurementBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementBuffer")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn drain_returns_records_in_append_order() {
        let buffer = MeasurementBuffer::new(8);
        for i in 0..5 {
            buffer.append(i);
        }
        assert_eq!(buffer.drain_all(), vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let buffer = MeasurementBuffer::new(10);
        for i in 0..15 {
            buffer.append(i);
        }
        assert_eq!(buffer.dropped(), 5);
        assert_eq!(buffer.drain_all(), (5..15).collect::<Vec<_>>());
    }

    #[test]
    fn append_reports_occupancy() {
        let buffer = MeasurementBuffer::new(3);
        assert_eq!(buffer.append("a"), 1);
        assert_eq!(buffer.append("b"), 2);
        assert_eq!(buffer.append("c"), 3);
        assert_eq!(buffer.append("d"), 3);
    }

    #[test]
    fn append_to_full_buffer_stays_fast() {
        let buffer = MeasurementBuffer::new(16);
        for i in 0..16 {
            buffer.append(i);
        }

        let extra = 100_000;
        let start = Instant::now();
        for i in 0..extra {
            buffer.append(i);
        }
        let elapsed = start.elapsed();

        assert_eq!(buffer.dropped(), extra as u64);
        assert!(
            elapsed < Duration::from_secs(2),
            "appending to a full buffer took {elapsed:?}"
        );
    }

    #[test]
    fn concurrent_producers_lose_nothing_below_capacity() {
        let buffer = Arc::new(MeasurementBuffer::new(4_000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..1_000 {
                        buffer.append(t * 1_000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = buffer.drain_all();
        drained.sort_unstable();
        assert_eq!(drained, (0..4_000).collect::<Vec<_>>());
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn zero_capacity_is_bumped() {
        let buffer = MeasurementBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.append(1);
        buffer.append(2);
        assert_eq!(buffer.drain_all(), vec![2]);
        assert_eq!(buffer.dropped(), 1);
    }
}
