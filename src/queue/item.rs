use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use uuid::Uuid;

use crate::pipeline::{Flusher, Pipeline};

/// Identifier of a logical delivery destination. Stable for the lifetime of
/// a destination configuration; used as the registry key in the manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct QueueKey(pub u64);

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload shape discriminant, preserved across retries so the consumer can
/// decode the body correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawDataType {
    EventGroup,
    EventGroupList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendingStatus {
    Idle,
    Sending,
}

const STATUS_IDLE: u8 = 0;
const STATUS_SENDING: u8 = 1;

/// Atomic send-state cell. Only the two legal transitions are exposed;
/// there is no raw store.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(STATUS_IDLE))
    }

    pub fn load(&self) -> SendingStatus {
        match self.0.load(Ordering::Acquire) {
            STATUS_IDLE => SendingStatus::Idle,
            _ => SendingStatus::Sending,
        }
    }

    /// Idle -> Sending. A `false` return means another dispatcher won the
    /// race; it is a normal outcome, not a fault.
    pub fn try_begin_send(&self) -> bool {
        self.0
            .compare_exchange(
                STATUS_IDLE,
                STATUS_SENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Sending -> Idle, taken when a retryable failure returns the item to
    /// its queue.
    pub fn finish_send(&self) -> bool {
        self.0
            .compare_exchange(
                STATUS_SENDING,
                STATUS_IDLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Mutable delivery metadata. Kept behind its own lock, separate from the
/// status cell: status transitions serialize dispatch ownership, the lock
/// only guards the bookkeeping fields.
#[derive(Debug, Clone)]
struct ItemMeta {
    first_enqueue_time: Option<DateTime<Utc>>,
    last_send_time: Option<DateTime<Utc>>,
    try_cnt: u32,
    next_attempt_at: Option<Instant>,
}

/// One unit of already-serialized payload plus delivery metadata, awaiting
/// transport. Field semantics follow the collection-pipeline queue model:
/// the pinned pipeline slot is populated only across a configuration update
/// to keep the old pipeline alive until the item drains.
pub struct SenderQueueItem {
    id: Uuid,
    data: Bytes,
    raw_size: usize,
    kind: RawDataType,
    buffer_on_failure: bool,
    queue_key: QueueKey,
    flusher: Arc<dyn Flusher>,
    pipeline_ctx: Weak<Pipeline>,
    pinned_pipeline: Mutex<Option<Arc<Pipeline>>>,
    status: StatusCell,
    meta: Mutex<ItemMeta>,
}

impl SenderQueueItem {
    pub fn new(
        data: Bytes,
        raw_size: usize,
        flusher: Arc<dyn Flusher>,
        pipeline_ctx: Weak<Pipeline>,
        queue_key: QueueKey,
        kind: RawDataType,
        buffer_on_failure: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            raw_size,
            kind,
            buffer_on_failure,
            queue_key,
            flusher,
            pipeline_ctx,
            pinned_pipeline: Mutex::new(None),
            status: StatusCell::new(),
            meta: Mutex::new(ItemMeta {
                first_enqueue_time: None,
                last_send_time: None,
                try_cnt: 1,
                next_attempt_at: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn raw_size(&self) -> usize {
        self.raw_size
    }

    pub fn kind(&self) -> RawDataType {
        self.kind
    }

    pub fn buffer_on_failure(&self) -> bool {
        self.buffer_on_failure
    }

    pub fn queue_key(&self) -> QueueKey {
        self.queue_key
    }

    pub fn flusher(&self) -> &Arc<dyn Flusher> {
        &self.flusher
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }

    pub fn try_count(&self) -> u32 {
        self.meta.lock().try_cnt
    }

    pub fn first_enqueue_time(&self) -> Option<DateTime<Utc>> {
        self.meta.lock().first_enqueue_time
    }

    pub fn last_send_time(&self) -> Option<DateTime<Utc>> {
        self.meta.lock().last_send_time
    }

    /// Whether the head-of-queue backoff window has elapsed.
    pub fn ready_at(&self, now: Instant) -> bool {
        match self.meta.lock().next_attempt_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Stamped on first admission; later re-admissions keep the original.
    pub(crate) fn mark_enqueued(&self, now: DateTime<Utc>) {
        let mut meta = self.meta.lock();
        if meta.first_enqueue_time.is_none() {
            meta.first_enqueue_time = Some(now);
        }
    }

    pub(crate) fn mark_send_started(&self, now: DateTime<Utc>) {
        self.meta.lock().last_send_time = Some(now);
    }

    /// Retryable-failure bookkeeping: bumps the try count (monotone) and
    /// records when the next attempt becomes eligible.
    pub(crate) fn record_retry(&self, now: DateTime<Utc>, next_attempt_at: Instant) {
        let mut meta = self.meta.lock();
        meta.try_cnt += 1;
        meta.last_send_time = Some(now);
        meta.next_attempt_at = Some(next_attempt_at);
    }

    /// Pins the given pipeline onto this item, keeping it alive until the
    /// item drains. No-op when a pipeline is already pinned.
    pub(crate) fn pin_pipeline(&self, pipeline: Arc<Pipeline>) {
        let mut slot = self.pinned_pipeline.lock();
        if slot.is_none() {
            *slot = Some(pipeline);
        }
    }

    pub fn pinned_pipeline(&self) -> Option<Arc<Pipeline>> {
        self.pinned_pipeline.lock().clone()
    }

    /// Validity check consulted before and after a send completes. A pinned
    /// pipeline keeps the old instance valid through an update; otherwise
    /// the item is only valid while its owning pipeline is alive and not
    /// torn down.
    pub fn is_context_valid(&self) -> bool {
        if let Some(pinned) = self.pinned_pipeline.lock().as_ref() {
            return !pinned.is_cancelled();
        }
        match self.pipeline_ctx.upgrade() {
            Some(pipeline) => !pipeline.is_cancelled(),
            None => false,
        }
    }

    /// Explicit clone for fanning the same logical data out to multiple
    /// destinations. Always yields a fresh Idle copy with its own metadata
    /// cell and identity; in-flight state is never duplicated.
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            data: self.data.clone(),
            raw_size: self.raw_size,
            kind: self.kind,
            buffer_on_failure: self.buffer_on_failure,
            queue_key: self.queue_key,
            flusher: self.flusher.clone(),
            pipeline_ctx: self.pipeline_ctx.clone(),
            pinned_pipeline: Mutex::new(self.pinned_pipeline.lock().clone()),
            status: StatusCell::new(),
            meta: Mutex::new(self.meta.lock().clone()),
        }
    }
}

impl std::fmt::Debug for SenderQueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderQueueItem")
            .field("id", &self.id)
            .field("queue_key", &self.queue_key)
            .field("raw_size", &self.raw_size)
            .field("kind", &self.kind)
            .field("status", &self.status.load())
            .field("try_cnt", &self.try_count())
            .finish()
    }
}
