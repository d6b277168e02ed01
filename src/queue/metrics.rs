use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a queue's counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsSnapshot {
    pub pushed: u64,
    pub refused: u64,
    pub dispatched: u64,
    pub retried: u64,
    pub removed: u64,
}

/// Lock-free per-queue counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    pushed: AtomicU64,
    refused: AtomicU64,
    dispatched: AtomicU64,
    retried: AtomicU64,
    removed: AtomicU64,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_push(&self) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refusal(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
        }
    }
}
