use bytes::Bytes;
use sendlane::dispatch::{
    BackoffPolicy, BackoffStrategy, DispatchConfig, FlushDispatcher, RetryConfig,
};
use sendlane::pipeline::{Flusher, Pipeline, QueueBinding};
use sendlane::queue::{QueueCapacity, QueueKey, QueueManager, RawDataType, SenderQueueItem};
use sendlane::transport::{
    HttpFlusher, HttpFlusherConfig, HttpTransport, HttpTransportConfig, RAW_TYPE_HEADER,
    Transport, TransportError, TransportRequest,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request_for(server: &MockServer, request_path: &str) -> TransportRequest {
    let url = Url::parse(&server.uri()).unwrap();
    TransportRequest::new(
        "POST",
        false,
        url.host_str().unwrap(),
        url.port_or_known_default().unwrap(),
        request_path,
    )
}

#[tokio::test]
async fn request_fields_map_onto_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/logs"))
        .and(query_param("project", "demo"))
        .and(header("x-api-key", "secret"))
        .and(body_bytes(b"payload".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let request = request_for(&server, "/v1/logs")
        .with_query("project=demo")
        .with_header("x-api-key", "secret")
        .with_body(Bytes::from_static(b"payload"));

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Bytes::from_static(b"ok"));
    assert!(response.is_success());

    let stats = transport.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
}

#[tokio::test]
async fn server_errors_pass_through_as_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let response = transport.send(request_for(&server, "/")).await.unwrap();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    assert_eq!(transport.stats().failed_requests, 1);
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let request = request_for(&server, "/").with_timeout(Duration::from_millis(100));
    let err = transport.send(request).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout));
}

#[tokio::test]
async fn unreachable_host_retries_are_spaced_out() {
    // Bind then drop a listener so the port is known to refuse connections.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let request = TransportRequest::new("POST", false, "127.0.0.1", port, "/")
        .with_max_try_cnt(3);

    let start = std::time::Instant::now();
    let err = transport.send(request).await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
    // Three attempts with a pause after each of the first two.
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn flusher_request_carries_payload_shape_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .and(query_param("src", "agent"))
        .and(header(RAW_TYPE_HEADER, "event-group-list"))
        .and(header("content-type", "application/octet-stream"))
        .and(body_bytes(b"batch".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let flusher = Arc::new(
        HttpFlusher::new(HttpFlusherConfig {
            endpoint: format!("{}/v1/ingest?src=agent", server.uri()),
            ..Default::default()
        })
        .unwrap(),
    );
    let pipeline = Pipeline::new("p", 1);
    let item = SenderQueueItem::new(
        Bytes::from_static(b"batch"),
        5,
        flusher.clone(),
        Arc::downgrade(&pipeline),
        QueueKey(1),
        RawDataType::EventGroupList,
        true,
    );

    let request = flusher.build_request(&item).unwrap();
    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn dispatcher_delivers_end_to_end_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/ingest"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let manager = Arc::new(QueueManager::new());
    let pipeline = Pipeline::new("p", 1);
    let flusher = Arc::new(
        HttpFlusher::new(HttpFlusherConfig {
            endpoint: format!("{}/v1/ingest", server.uri()),
            ..Default::default()
        })
        .unwrap(),
    );
    manager.create_or_update(
        QueueKey(1),
        QueueCapacity::default(),
        QueueBinding::new(flusher, pipeline),
    );
    manager
        .enqueue(QueueKey(1), Bytes::from_static(b"a"), 1, RawDataType::EventGroup, true)
        .unwrap();
    manager
        .enqueue(QueueKey(1), Bytes::from_static(b"b"), 1, RawDataType::EventGroup, true)
        .unwrap();

    let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default()).unwrap());
    let backoff = BackoffPolicy::new(RetryConfig {
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        strategy: BackoffStrategy::FixedDelay,
        jitter: false,
    });
    let dispatcher = Arc::new(FlushDispatcher::new(
        manager.clone(),
        transport,
        backoff,
        DispatchConfig::default(),
    ));

    while dispatcher.dispatch_once().await {}

    assert_eq!(dispatcher.stats().succeeded, 2);
    assert_eq!(manager.depth(QueueKey(1)), Some((0, 0)));
}
