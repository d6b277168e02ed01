use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;

use super::error::{CapacityLimit, QueueError};
use super::item::{QueueKey, SenderQueueItem, SendingStatus};
use super::metrics::{QueueStats, QueueStatsSnapshot};
use crate::pipeline::Pipeline;

/// Independently tunable admission limits for one destination queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCapacity {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for QueueCapacity {
    fn default() -> Self {
        Self {
            max_items: 1024,
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

struct QueueInner {
    items: VecDeque<Arc<SenderQueueItem>>,
    bytes: usize,
    in_flight: bool,
    capacity: QueueCapacity,
    pending_removal: bool,
}

/// Per-key ordered buffer with byte/count admission limits and a single
/// in-flight dispatch slot. Items stay resident while Sending, so relative
/// order against newer items of the same key is preserved across retries.
pub struct SenderQueue {
    key: QueueKey,
    inner: Mutex<QueueInner>,
    stats: QueueStats,
    space_freed: Notify,
}

impl SenderQueue {
    pub fn new(key: QueueKey, capacity: QueueCapacity) -> Self {
        Self {
            key,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                bytes: 0,
                in_flight: false,
                capacity,
                pending_removal: false,
            }),
            stats: QueueStats::new(),
            space_freed: Notify::new(),
        }
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    /// Appends in arrival order, refusing admission synchronously when
    /// either limit would be exceeded. Queue contents are unchanged on
    /// refusal; the producer decides how to react.
    pub fn push(&self, item: Arc<SenderQueueItem>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.pending_removal {
            self.stats.record_refusal();
            return Err(QueueError::PendingRemoval(self.key));
        }
        if inner.items.len() + 1 > inner.capacity.max_items {
            self.stats.record_refusal();
            return Err(QueueError::CapacityExceeded {
                key: self.key,
                limit: CapacityLimit::Items,
            });
        }
        let new_bytes = inner.bytes.checked_add(item.raw_size());
        let Some(new_bytes) = new_bytes.filter(|b| *b <= inner.capacity.max_bytes) else {
            self.stats.record_refusal();
            return Err(QueueError::CapacityExceeded {
                key: self.key,
                limit: CapacityLimit::Bytes,
            });
        };

        item.mark_enqueued(Utc::now());
        inner.bytes = new_bytes;
        inner.items.push_back(item);
        self.stats.record_push();
        Ok(())
    }

    /// Returns the oldest item and marks it Sending, but only when the
    /// single in-flight slot is free and the head's backoff window has
    /// elapsed. `None` is a normal outcome, never an error.
    pub fn pop_dispatchable(&self, now: Instant) -> Option<Arc<SenderQueueItem>> {
        let mut inner = self.inner.lock();
        if inner.in_flight {
            return None;
        }
        let head = inner.items.front()?;
        if !head.ready_at(now) {
            return None;
        }
        if !head.status().try_begin_send() {
            return None;
        }
        let head = head.clone();
        inner.in_flight = true;
        head.mark_send_started(Utc::now());
        self.stats.record_dispatch();
        Some(head)
    }

    /// Terminal transition (success or drop): unlinks the item, releases
    /// the in-flight slot, and wakes producers blocked on backpressure.
    /// Returns whether the item was resident.
    pub fn remove(&self, item: &Arc<SenderQueueItem>) -> bool {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.items.iter().position(|i| Arc::ptr_eq(i, item)) else {
            return false;
        };
        inner.items.remove(pos);
        inner.bytes = inner.bytes.saturating_sub(item.raw_size());
        if item.status().load() == SendingStatus::Sending {
            inner.in_flight = false;
        }
        drop(inner);
        self.stats.record_removal();
        self.space_freed.notify_waiters();
        true
    }

    /// Retryable failure: Sending -> Idle, try count bumped, the item keeps
    /// its position at the front of the queue.
    pub fn requeue(&self, item: &Arc<SenderQueueItem>, next_attempt_at: Instant) {
        if !item.status().finish_send() {
            debug!(item_id = %item.id(), "requeue on an item not in Sending state");
            return;
        }
        item.record_retry(Utc::now(), next_attempt_at);
        let mut inner = self.inner.lock();
        inner.in_flight = false;
        self.stats.record_retry();
    }

    /// In-place capacity update on pipeline reload; resident items are
    /// undisturbed even if they now exceed the new limits.
    pub fn update_capacity(&self, capacity: QueueCapacity) {
        self.inner.lock().capacity = capacity;
    }

    pub fn capacity(&self) -> QueueCapacity {
        self.inner.lock().capacity
    }

    /// Pins `pipeline` onto every resident item that does not already hold
    /// one, keeping the old pipeline alive across a configuration update.
    pub fn set_pipeline_for_resident_items(&self, pipeline: &Arc<Pipeline>) {
        let inner = self.inner.lock();
        for item in &inner.items {
            item.pin_pipeline(pipeline.clone());
        }
    }

    pub fn mark_for_removal(&self) {
        self.inner.lock().pending_removal = true;
    }

    pub fn clear_removal_mark(&self) {
        self.inner.lock().pending_removal = false;
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.inner.lock().pending_removal
    }

    /// True once a tombstoned queue has fully drained and can be reaped.
    pub fn is_drained_tombstone(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending_removal && inner.items.is_empty()
    }

    pub fn depth(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.items.len(), inner.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Resolves the next time `remove` frees capacity. Used by producers
    /// implementing a blocking backpressure policy.
    pub async fn space_freed(&self) {
        self.space_freed.notified().await;
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for SenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (items, bytes) = self.depth();
        f.debug_struct("SenderQueue")
            .field("key", &self.key)
            .field("items", &items)
            .field("bytes", &bytes)
            .field("pending_removal", &self.is_marked_for_removal())
            .finish()
    }
}
