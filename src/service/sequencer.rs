//! Per-device sequencing.
//!
//! Every device gets one logical worker: a bounded queue plus one task
//! that drains it. Messages of one device are therefore processed one at a
//! time in arrival order, while devices never wait on each other. The
//! routing map is locked only to find or create a queue, never while a
//! message is processed.
//!
//! Queues are bounded; when a burst fills one, the oldest queued message
//! is evicted so that the newest readings win and the listener never
//! blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::device_worker::{DeviceWorker, WorkerContext};
use crate::domain::{DeviceId, RawRecord};
use crate::persistence::Backend;

/// Bounded, drop-oldest queue feeding one device worker.
#[derive(Debug)]
pub struct DeviceQueue {
    items: Mutex<VecDeque<RawRecord>>,
    capacity: usize,
    ready: Notify,
}

impl DeviceQueue {
    /// Creates a queue holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            ready: Notify::new(),
        }
    }

    /// Appends a message, evicting the oldest one when full. Returns the
    /// evicted message, if any.
    pub fn push(&self, record: RawRecord) -> Option<RawRecord> {
        let evicted = {
            let mut items = self.items.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(record);
            evicted
        };
        self.ready.notify_one();
        evicted
    }

    /// Waits for and removes the next message.
    pub async fn pop(&self) -> RawRecord {
        loop {
            let next = self.items.lock().pop_front();
            if let Some(record) = next {
                return record;
            }
            self.ready.notified().await;
        }
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Routes raw records to per-device workers, creating them lazily.
#[derive(Debug)]
pub struct Sequencer<B: Backend> {
    ctx: Arc<WorkerContext<B>>,
    queues: Mutex<HashMap<DeviceId, Arc<DeviceQueue>>>,
}

impl<B: Backend> Sequencer<B> {
    /// Creates a sequencer whose workers share `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<WorkerContext<B>>) -> Self {
        Self {
            ctx,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a record for its device, spawning the device's worker if
    /// none is alive. Never blocks on processing.
    pub fn submit(self: &Arc<Self>, record: RawRecord) {
        let device_id = record.device_id;
        let mut spawned = None;
        {
            let mut queues = self.queues.lock();
            let queue = queues.entry(device_id).or_insert_with(|| {
                let queue = Arc::new(DeviceQueue::new(self.ctx.settings.queue_depth));
                spawned = Some(Arc::clone(&queue));
                queue
            });
            if let Some(evicted) = queue.push(record) {
                self.ctx.stats.record_queue_overflow();
                tracing::warn!(
                    %device_id,
                    evicted_sequence = evicted.sequence,
                    "device queue full, dropping oldest message"
                );
            }
        }

        if let Some(queue) = spawned {
            tracing::debug!(%device_id, "starting device worker");
            let worker = DeviceWorker::new(device_id, queue, Arc::clone(self), Arc::clone(&self.ctx));
            tokio::spawn(worker.run());
        }
    }

    /// Removes `queue` from routing if it is still empty, running
    /// `on_retire` while routing is locked so that no new worker for the
    /// device can start before it completes. Returns `false` (and leaves
    /// everything untouched) if messages arrived in the meantime.
    pub(crate) fn retire(
        &self,
        device_id: DeviceId,
        queue: &Arc<DeviceQueue>,
        on_retire: impl FnOnce(),
    ) -> bool {
        let mut queues = self.queues.lock();
        if !queue.is_empty() {
            return false;
        }
        if queues
            .get(&device_id)
            .is_some_and(|current| Arc::ptr_eq(current, queue))
        {
            queues.remove(&device_id);
        }
        on_retire();
        true
    }

    /// Number of live device workers.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.queues.lock().len()
    }

    /// Returns `true` if a worker is alive for `device_id`.
    #[must_use]
    pub fn is_active(&self, device_id: DeviceId) -> bool {
        self.queues.lock().contains_key(&device_id)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn record(seq: u64) -> RawRecord {
        RawRecord {
            device_id: DeviceId::new(1),
            fields: BTreeMap::new(),
            reported_at: None,
            received_at: Utc::now(),
            sequence: seq,
        }
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let queue = DeviceQueue::new(2);
        assert!(queue.push(record(1)).is_none());
        assert!(queue.push(record(2)).is_none());
        let evicted = queue.push(record(3));
        assert_eq!(evicted.map(|r| r.sequence), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pop_returns_in_fifo_order() {
        let queue = DeviceQueue::new(8);
        queue.push(record(1));
        queue.push(record(2));
        assert_eq!(queue.pop().await.sequence, 1);
        assert_eq!(queue.pop().await.sequence, 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = Arc::new(DeviceQueue::new(8));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await.sequence })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(record(42));
        let Ok(Ok(seq)) = tokio::time::timeout(Duration::from_secs(1), waiter).await else {
            panic!("waiter did not wake");
        };
        assert_eq!(seq, 42);
    }
}
