use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::backpressure::BackpressureStrategy;
use super::error::QueueError;
use super::item::{QueueKey, RawDataType, SenderQueueItem};
use super::metrics::QueueStatsSnapshot;
use super::sender_queue::{QueueCapacity, SenderQueue};
use crate::pipeline::QueueBinding;

struct RegisteredQueue {
    queue: SenderQueue,
    binding: Mutex<QueueBinding>,
}

/// Registry mapping QueueKey to its SenderQueue and destination binding.
/// Owns queue lifecycle: creation on registration, in-place reconfiguration
/// on pipeline reload, and deferred removal once drained.
pub struct QueueManager {
    queues: Mutex<BTreeMap<QueueKey, Arc<RegisteredQueue>>>,
    cursor: AtomicUsize,
    work_available: Notify,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            cursor: AtomicUsize::new(0),
            work_available: Notify::new(),
        }
    }

    fn entry(&self, key: QueueKey) -> Option<Arc<RegisteredQueue>> {
        self.queues.lock().get(&key).cloned()
    }

    /// Registers a queue on first use; on reload updates capacity in place
    /// without disturbing resident items. When the pipeline instance
    /// changed, resident items are pinned to the old pipeline so it stays
    /// alive until they drain. Re-registering a tombstoned key revives it.
    pub fn create_or_update(&self, key: QueueKey, capacity: QueueCapacity, binding: QueueBinding) {
        let mut queues = self.queues.lock();
        match queues.get(&key) {
            None => {
                let registered = RegisteredQueue {
                    queue: SenderQueue::new(key, capacity),
                    binding: Mutex::new(binding),
                };
                queues.insert(key, Arc::new(registered));
                info!(key = %key, "registered sender queue");
            }
            Some(entry) => {
                entry.queue.update_capacity(capacity);
                entry.queue.clear_removal_mark();
                let mut current = entry.binding.lock();
                if !Arc::ptr_eq(&current.pipeline, &binding.pipeline) {
                    let old = current.pipeline.clone();
                    entry.queue.set_pipeline_for_resident_items(&old);
                    info!(
                        key = %key,
                        old_generation = old.generation(),
                        new_generation = binding.pipeline.generation(),
                        "pipeline updated; resident items pinned to old pipeline"
                    );
                }
                *current = binding;
            }
        }
    }

    /// Producer interface: constructs an item from the key's binding and
    /// admits it. Admission refusal surfaces synchronously as backpressure.
    pub fn enqueue(
        &self,
        key: QueueKey,
        payload: Bytes,
        raw_size: usize,
        kind: RawDataType,
        buffer_on_failure: bool,
    ) -> Result<(), QueueError> {
        let entry = self.entry(key).ok_or(QueueError::UnknownKey(key))?;
        let (flusher, pipeline) = {
            let binding = entry.binding.lock();
            (binding.flusher.clone(), Arc::downgrade(&binding.pipeline))
        };
        let item = Arc::new(SenderQueueItem::new(
            payload,
            raw_size,
            flusher,
            pipeline,
            key,
            kind,
            buffer_on_failure,
        ));
        entry.queue.push(item)?;
        self.work_available.notify_one();
        Ok(())
    }

    /// Enqueue with a producer-side backpressure policy layered on top of
    /// the queue's synchronous refusal.
    pub async fn enqueue_with_strategy(
        &self,
        key: QueueKey,
        payload: Bytes,
        raw_size: usize,
        kind: RawDataType,
        buffer_on_failure: bool,
        strategy: BackpressureStrategy,
    ) -> Result<(), QueueError> {
        let first = self.enqueue(key, payload.clone(), raw_size, kind, buffer_on_failure);
        let retryable = matches!(&first, Err(e) if e.is_capacity_exceeded());
        if !retryable {
            return first;
        }

        match strategy {
            BackpressureStrategy::Drop => first,
            BackpressureStrategy::Yield => {
                tokio::task::yield_now().await;
                self.enqueue(key, payload, raw_size, kind, buffer_on_failure)
            }
            BackpressureStrategy::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                self.enqueue(key, payload, raw_size, kind, buffer_on_failure)
            }
            BackpressureStrategy::Block => loop {
                // Bounded wait so a removal racing ahead of the notify
                // cannot park the producer indefinitely.
                let _ = tokio::time::timeout(
                    Duration::from_millis(50),
                    self.wait_for_space(key),
                )
                .await;
                match self.enqueue(key, payload.clone(), raw_size, kind, buffer_on_failure) {
                    Err(e) if e.is_capacity_exceeded() => continue,
                    result => return result,
                }
            },
        }
    }

    /// Resolves the next time the key's queue frees capacity.
    pub async fn wait_for_space(&self, key: QueueKey) -> Result<(), QueueError> {
        let entry = self.entry(key).ok_or(QueueError::UnknownKey(key))?;
        entry.queue.space_freed().await;
        Ok(())
    }

    /// Defers deletion until the queue has drained; an already-empty queue
    /// is reaped immediately.
    pub fn mark_for_removal(&self, key: QueueKey) -> Result<(), QueueError> {
        let mut queues = self.queues.lock();
        let entry = queues.get(&key).ok_or(QueueError::UnknownKey(key))?;
        entry.queue.mark_for_removal();
        if entry.queue.is_drained_tombstone() {
            queues.remove(&key);
            info!(key = %key, "removed empty queue");
        }
        Ok(())
    }

    /// Fairness primitive for the dispatcher: scans queues starting from a
    /// rotating cursor so one busy destination cannot starve the others.
    /// At most one item is checked out per call.
    pub fn pop_round_robin(&self, now: Instant) -> Option<Arc<SenderQueueItem>> {
        let entries: Vec<Arc<RegisteredQueue>> = {
            let queues = self.queues.lock();
            queues.values().cloned().collect()
        };
        if entries.is_empty() {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % entries.len();
        for offset in 0..entries.len() {
            let entry = &entries[(start + offset) % entries.len()];
            if let Some(item) = entry.queue.pop_dispatchable(now) {
                return Some(item);
            }
        }
        None
    }

    /// Terminal removal of a checked-out item, reaping the queue if it was
    /// tombstoned and has now drained.
    pub fn remove_item(&self, item: &Arc<SenderQueueItem>) -> bool {
        let key = item.queue_key();
        let Some(entry) = self.entry(key) else {
            debug!(key = %key, "remove for an item whose queue is gone");
            return false;
        };
        let removed = entry.queue.remove(item);
        if removed && entry.queue.is_drained_tombstone() {
            self.queues.lock().remove(&key);
            info!(key = %key, "reaped drained queue marked for removal");
        }
        removed
    }

    /// Returns a checked-out item to the front of its queue after a
    /// retryable failure.
    pub fn requeue_item(&self, item: &Arc<SenderQueueItem>, next_attempt_at: Instant) -> bool {
        let Some(entry) = self.entry(item.queue_key()) else {
            return false;
        };
        entry.queue.requeue(item, next_attempt_at);
        true
    }

    /// Parks a dispatcher worker until new work arrives or the poll
    /// interval elapses.
    pub async fn wait_for_work(&self, poll_interval: Duration) {
        let _ = tokio::time::timeout(poll_interval, self.work_available.notified()).await;
    }

    pub fn depth(&self, key: QueueKey) -> Option<(usize, usize)> {
        self.entry(key).map(|e| e.queue.depth())
    }

    pub fn queue_stats(&self, key: QueueKey) -> Option<QueueStatsSnapshot> {
        self.entry(key).map(|e| e.queue.stats())
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn contains(&self, key: QueueKey) -> bool {
        self.queues.lock().contains_key(&key)
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queues", &self.queue_count())
            .finish()
    }
}
