use bytes::Bytes;
use sendlane::dispatch::{
    BackoffPolicy, BackoffStrategy, DispatchConfig, FlushDispatcher, RetryConfig,
};
use sendlane::pipeline::{Pipeline, QueueBinding};
use sendlane::queue::{QueueCapacity, QueueKey, QueueManager, RawDataType};
use sendlane::transport::{
    HttpFlusher, HttpFlusherConfig, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const KEY: QueueKey = QueueKey(1);

/// Transport double that acknowledges everything and counts how many
/// requests actually went out.
#[derive(Default)]
struct CountingTransport {
    sent: AtomicUsize,
}

impl CountingTransport {
    fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Transport for CountingTransport {
    async fn send(
        &self,
        _request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(TransportResponse {
            status: 200,
            headers: Default::default(),
            body: Bytes::new(),
        })
    }
}

fn test_flusher() -> Arc<HttpFlusher> {
    Arc::new(HttpFlusher::new(HttpFlusherConfig::default()).unwrap())
}

fn zero_backoff() -> BackoffPolicy {
    BackoffPolicy::new(RetryConfig {
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        strategy: BackoffStrategy::FixedDelay,
        jitter: false,
    })
}

fn dispatcher_for(
    manager: &Arc<QueueManager>,
    transport: Arc<CountingTransport>,
) -> Arc<FlushDispatcher<CountingTransport>> {
    Arc::new(FlushDispatcher::new(
        manager.clone(),
        transport,
        zero_backoff(),
        DispatchConfig::default(),
    ))
}

fn enqueue(manager: &QueueManager, key: QueueKey, body: &'static [u8]) {
    manager
        .enqueue(
            key,
            Bytes::from_static(body),
            body.len(),
            RawDataType::EventGroup,
            true,
        )
        .unwrap();
}

#[tokio::test]
async fn old_pipeline_stays_alive_until_resident_items_drain() {
    let manager = Arc::new(QueueManager::new());
    let old = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), old.clone()),
    );
    enqueue(&manager, KEY, b"one");
    enqueue(&manager, KEY, b"two");

    // Hot swap to a new pipeline instance. The two resident items each pin
    // the old pipeline, keeping it alive after the binding lets go.
    let new = Pipeline::new("p", 2);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), new.clone()),
    );
    assert_eq!(Arc::strong_count(&old), 3);

    let transport = Arc::new(CountingTransport::default());
    let dispatcher = dispatcher_for(&manager, transport.clone());
    assert!(dispatcher.dispatch_once().await);
    assert!(dispatcher.dispatch_once().await);
    assert!(!dispatcher.dispatch_once().await);

    // Pre-update items still went out: the old pipeline was never torn down.
    assert_eq!(transport.sent(), 2);
    assert_eq!(dispatcher.stats().succeeded, 2);
    assert_eq!(Arc::strong_count(&old), 1);
}

#[tokio::test]
async fn torn_down_pipeline_items_are_released_without_sending() {
    let manager = Arc::new(QueueManager::new());
    let pipeline = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), pipeline.clone()),
    );
    enqueue(&manager, KEY, b"one");
    enqueue(&manager, KEY, b"two");

    pipeline.shutdown();

    let transport = Arc::new(CountingTransport::default());
    let dispatcher = dispatcher_for(&manager, transport.clone());
    assert!(dispatcher.dispatch_once().await);
    assert!(dispatcher.dispatch_once().await);
    assert!(!dispatcher.dispatch_once().await);

    assert_eq!(transport.sent(), 0);
    let stats = dispatcher.stats();
    assert_eq!(stats.invalidated, 2);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(manager.depth(KEY), Some((0, 0)));
}

#[tokio::test]
async fn removal_is_deferred_until_the_queue_drains() {
    let manager = Arc::new(QueueManager::new());
    let pipeline = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), pipeline),
    );
    enqueue(&manager, KEY, b"resident");

    manager.mark_for_removal(KEY).unwrap();
    // Still registered: one item is resident.
    assert!(manager.contains(KEY));

    // New work is refused while the tombstone drains.
    let err = manager
        .enqueue(KEY, Bytes::from_static(b"late"), 4, RawDataType::EventGroup, true)
        .unwrap_err();
    assert!(!err.is_capacity_exceeded());

    let transport = Arc::new(CountingTransport::default());
    let dispatcher = dispatcher_for(&manager, transport.clone());
    assert!(dispatcher.dispatch_once().await);

    // The resident item was delivered, then the queue was reaped.
    assert_eq!(transport.sent(), 1);
    assert!(!manager.contains(KEY));
    assert_eq!(manager.queue_count(), 0);
}

#[tokio::test]
async fn empty_queue_is_reaped_immediately() {
    let manager = QueueManager::new();
    let pipeline = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), pipeline),
    );
    assert!(manager.contains(KEY));

    manager.mark_for_removal(KEY).unwrap();
    assert!(!manager.contains(KEY));
    assert!(manager.mark_for_removal(KEY).is_err());
}

#[tokio::test]
async fn re_registering_a_tombstoned_key_revives_it() {
    let manager = QueueManager::new();
    let pipeline = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), pipeline.clone()),
    );
    enqueue(&manager, KEY, b"resident");
    manager.mark_for_removal(KEY).unwrap();

    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), pipeline),
    );

    // Admission works again and the resident item was kept.
    enqueue(&manager, KEY, b"fresh");
    assert_eq!(manager.depth(KEY), Some((2, 13)));
}

#[tokio::test]
async fn capacity_update_does_not_disturb_resident_items() {
    let manager = QueueManager::new();
    let pipeline = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity {
            max_items: 100,
            max_bytes: 100,
        },
        QueueBinding::new(test_flusher(), pipeline.clone()),
    );
    enqueue(&manager, KEY, b"0123456789");
    enqueue(&manager, KEY, b"0123456789");

    // Shrink below current occupancy. Resident items stay; new ones refuse.
    manager.create_or_update(
        KEY,
        QueueCapacity {
            max_items: 100,
            max_bytes: 5,
        },
        QueueBinding::new(test_flusher(), pipeline),
    );
    assert_eq!(manager.depth(KEY), Some((2, 20)));

    let err = manager
        .enqueue(KEY, Bytes::from_static(b"x"), 1, RawDataType::EventGroup, true)
        .unwrap_err();
    assert!(err.is_capacity_exceeded());
    assert_eq!(manager.depth(KEY), Some((2, 20)));
}

#[tokio::test]
async fn items_enqueued_after_an_update_belong_to_the_new_pipeline() {
    let manager = Arc::new(QueueManager::new());
    let old = Pipeline::new("p", 1);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), old.clone()),
    );
    enqueue(&manager, KEY, b"old-item");

    let new = Pipeline::new("p", 2);
    manager.create_or_update(
        KEY,
        QueueCapacity::default(),
        QueueBinding::new(test_flusher(), new.clone()),
    );
    enqueue(&manager, KEY, b"new-item");

    // Tearing down the old pipeline invalidates only its own item.
    old.shutdown();

    let transport = Arc::new(CountingTransport::default());
    let dispatcher = dispatcher_for(&manager, transport.clone());
    assert!(dispatcher.dispatch_once().await);
    assert!(dispatcher.dispatch_once().await);
    assert!(!dispatcher.dispatch_once().await);

    assert_eq!(transport.sent(), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.invalidated, 1);
    assert_eq!(stats.succeeded, 1);
}
