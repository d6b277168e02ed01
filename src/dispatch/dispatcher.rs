use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::backoff::BackoffPolicy;
use crate::pipeline::SendResult;
use crate::queue::{QueueManager, SenderQueueItem};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: usize,
    /// Upper bound on how long an idle worker sleeps before rescanning;
    /// also the granularity at which backed-off retries become visible.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    invalidated: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dropped: u64,
    pub invalidated: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Pulls eligible items out of the queues, drives the transport, and turns
/// the outcome into one of the item's terminal or retry transitions. Items
/// are exclusively checked out between `pop_round_robin` and the matching
/// `remove`/`requeue`.
pub struct FlushDispatcher<T: Transport> {
    manager: Arc<QueueManager>,
    transport: Arc<T>,
    backoff: BackoffPolicy,
    config: DispatchConfig,
    stats: Arc<DispatchStats>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl<T: Transport + 'static> FlushDispatcher<T> {
    pub fn new(
        manager: Arc<QueueManager>,
        transport: Arc<T>,
        backoff: BackoffPolicy,
        config: DispatchConfig,
    ) -> Self {
        Self {
            manager,
            transport,
            backoff,
            config,
            stats: Arc::new(DispatchStats::default()),
            shutdown: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Pops and fully processes at most one item. Returns whether any work
    /// was found; the worker loop and tests both drive this.
    pub async fn dispatch_once(&self) -> bool {
        match self.manager.pop_round_robin(Instant::now()) {
            Some(item) => {
                self.process(item).await;
                true
            }
            None => false,
        }
    }

    /// Launches the worker tasks. Workers stop after `shutdown`.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|worker_id| {
                let dispatcher = Arc::clone(self);
                tokio::spawn(async move { dispatcher.worker_loop(worker_id).await })
            })
            .collect()
    }

    /// Runs the worker pool to completion (i.e. until `shutdown`).
    pub async fn run(self: Arc<Self>) {
        let handles = self.spawn();
        let _ = futures::future::join_all(handles).await;
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "dispatch worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if !self.dispatch_once().await {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    () = self.manager.wait_for_work(self.config.poll_interval) => {}
                }
            }
        }
        debug!(worker_id, "dispatch worker stopped");
    }

    async fn process(&self, item: Arc<SenderQueueItem>) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        if !item.is_context_valid() {
            self.release_invalidated(&item);
            return;
        }

        let request = match item.flusher().build_request(&item) {
            Ok(request) => request,
            Err(e) => {
                self.drop_item(&item, &format!("request build failed: {e}"));
                return;
            }
        };
        let request_timeout = request.timeout;
        debug!(
            item_id = %item.id(),
            key = %item.queue_key(),
            try_cnt = item.try_count(),
            flusher = item.flusher().name(),
            "dispatching item"
        );

        // The outer timeout releases the single-flight slot even if the
        // transport never delivers a completion.
        let outcome = match timeout(request_timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        if !item.is_context_valid() {
            // The owning pipeline died mid-flight; the completion must not
            // be delivered anywhere.
            self.release_invalidated(&item);
            return;
        }

        match item.flusher().classify(&outcome) {
            SendResult::Success => {
                self.manager.remove_item(&item);
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    item_id = %item.id(),
                    tries = item.try_count(),
                    "item delivered"
                );
            }
            SendResult::Terminal => {
                self.drop_item(&item, "terminal failure");
            }
            SendResult::Retryable => {
                let try_cnt = item.try_count();
                if !item.buffer_on_failure() {
                    self.drop_item(&item, "retryable failure with buffering disabled");
                } else if try_cnt >= item.flusher().max_try_count() {
                    self.drop_item(&item, "retry budget exhausted");
                } else {
                    let delay = self.backoff.delay_for(try_cnt);
                    self.manager.requeue_item(&item, Instant::now() + delay);
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        item_id = %item.id(),
                        key = %item.queue_key(),
                        try_cnt = try_cnt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "send failed, item requeued at queue front"
                    );
                }
            }
        }
    }

    fn drop_item(&self, item: &Arc<SenderQueueItem>, reason: &str) {
        self.manager.remove_item(item);
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            item_id = %item.id(),
            key = %item.queue_key(),
            tries = item.try_count(),
            raw_size = item.raw_size(),
            reason,
            "dropping item"
        );
    }

    fn release_invalidated(&self, item: &Arc<SenderQueueItem>) {
        self.manager.remove_item(item);
        self.stats.invalidated.fetch_add(1, Ordering::Relaxed);
        debug!(
            item_id = %item.id(),
            key = %item.queue_key(),
            "releasing item whose pipeline context is gone"
        );
    }
}

impl<T: Transport> std::fmt::Debug for FlushDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushDispatcher")
            .field("workers", &self.config.workers)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
