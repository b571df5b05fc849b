//! Bounded, drop-oldest buffer in front of the time-series store.
//!
//! Device workers hand readings to [`ReadingWriter::enqueue`] and move on;
//! a single background task drains the buffer into the store. When the
//! store is unavailable the task keeps the reading at the head of the
//! buffer and retries after a fixed interval. When the buffer is full the
//! oldest reading is discarded and counted in [`ReadingWriter::lost`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::TimeSeriesStore;
use crate::domain::Reading;

/// Fire-and-forget reading sink with an observable loss counter.
#[derive(Debug)]
pub struct ReadingWriter {
    buffer: Mutex<VecDeque<Reading>>,
    capacity: usize,
    wake: Notify,
    lost: AtomicU64,
    written: AtomicU64,
    failures: AtomicU64,
}

impl ReadingWriter {
    /// Creates a writer buffering at most `capacity` readings.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            wake: Notify::new(),
            lost: AtomicU64::new(0),
            written: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Queues a reading for writing. Never blocks.
    pub fn enqueue(&self, reading: Reading) {
        {
            let mut buf = self.buffer.lock();
            if buf.len() >= self.capacity {
                buf.pop_front();
                let lost = self.lost.fetch_add(1, Ordering::Relaxed) + 1;
                if lost.is_power_of_two() {
                    tracing::warn!(lost, "time-series buffer saturated, dropping oldest readings");
                }
            }
            buf.push_back(reading);
        }
        self.wake.notify_one();
    }

    /// Readings discarded because the buffer was full.
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Readings successfully written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Failed write attempts (each retry counts).
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Readings waiting to be written.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Spawns the drain task.
    pub fn spawn<T: TimeSeriesStore>(
        self: &Arc<Self>,
        store: Arc<T>,
        retry_interval: Duration,
    ) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        tokio::spawn(async move { writer.run(store, retry_interval).await })
    }

    /// Pops `reading` after a successful append. A head evicted by overflow
    /// while the append was in flight is already counted as lost and is not
    /// counted again as written.
    fn complete_head(&self, reading: &Reading) -> bool {
        let popped = {
            let mut buf = self.buffer.lock();
            if buf.front() == Some(reading) {
                buf.pop_front();
                true
            } else {
                false
            }
        };
        if popped {
            self.written.fetch_add(1, Ordering::Relaxed);
        }
        popped
    }

    async fn run<T: TimeSeriesStore>(&self, store: Arc<T>, retry_interval: Duration) {
        loop {
            let head = self.buffer.lock().front().cloned();
            let Some(reading) = head else {
                self.wake.notified().await;
                continue;
            };

            match store.append(&reading).await {
                Ok(()) => {
                    self.complete_head(&reading);
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        pending = self.pending(),
                        "time-series append failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::DeviceId;
    use crate::persistence::MemoryStore;
    use chrono::Utc;

    fn reading(seq: u64) -> Reading {
        Reading {
            device_id: DeviceId::new(1),
            datastream: "flow".into(),
            value: 100.0,
            timestamp: Utc::now(),
            sequence: seq,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn overflow_drops_oldest() {
        let writer = ReadingWriter::new(2);
        writer.enqueue(reading(1));
        writer.enqueue(reading(2));
        writer.enqueue(reading(3));
        assert_eq!(writer.lost(), 1);
        assert_eq!(writer.pending(), 2);
        let head = writer.buffer.lock().front().map(|r| r.sequence);
        assert_eq!(head, Some(2));
    }

    #[test]
    fn head_evicted_mid_append_is_only_counted_lost() {
        let writer = ReadingWriter::new(1);
        writer.enqueue(reading(1));
        let Some(in_flight) = writer.buffer.lock().front().cloned() else {
            panic!("head should be queued");
        };
        writer.enqueue(reading(2));

        assert!(!writer.complete_head(&in_flight));
        assert_eq!(writer.lost(), 1);
        assert_eq!(writer.written(), 0);
        assert_eq!(writer.pending(), 1);

        let Some(head) = writer.buffer.lock().front().cloned() else {
            panic!("newest reading should remain");
        };
        assert!(writer.complete_head(&head));
        assert_eq!(writer.written(), 1);
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn drains_into_store() {
        let store = Arc::new(MemoryStore::default());
        let writer = Arc::new(ReadingWriter::new(16));
        let task = writer.spawn(Arc::clone(&store), Duration::from_millis(5));

        writer.enqueue(reading(1));
        writer.enqueue(reading(2));
        wait_for(|| store.readings().len() == 2).await;

        let seqs: Vec<u64> = store.readings().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(writer.written(), 2);
        task.abort();
    }

    #[tokio::test]
    async fn retries_after_transient_failure() {
        let store = Arc::new(MemoryStore::default());
        store.set_fail_appends(true);
        let writer = Arc::new(ReadingWriter::new(16));
        let task = writer.spawn(Arc::clone(&store), Duration::from_millis(5));

        writer.enqueue(reading(7));
        wait_for(|| writer.failures() >= 2).await;
        assert_eq!(writer.pending(), 1);

        store.set_fail_appends(false);
        wait_for(|| store.readings().len() == 1).await;
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.lost(), 0);
        task.abort();
    }
}
