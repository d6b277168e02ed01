use thiserror::Error;

use super::item::QueueKey;

/// Which admission limit refused a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityLimit {
    Items,
    Bytes,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Admission backpressure: the producer must block, drop, or spill per
    /// its own policy. The queue never blocks internally.
    #[error("Queue {key} refused admission: {limit:?} limit reached")]
    CapacityExceeded { key: QueueKey, limit: CapacityLimit },

    #[error("No queue registered for key {0}")]
    UnknownKey(QueueKey),

    /// The key was marked for removal; new items must go to a live queue.
    #[error("Queue {0} is marked for removal")]
    PendingRemoval(QueueKey),
}

impl QueueError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, QueueError::CapacityExceeded { .. })
    }
}
