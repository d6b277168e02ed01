use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Method};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::request::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::pipeline::SendResult;

/// HTTP status classification used by the stock flusher: 2xx succeeded,
/// 4xx is a client error retrying cannot fix, everything else is worth
/// another attempt.
/// Pause between connection-level retries so an unreachable host is not
/// hammered back-to-back.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub fn classify_http_status(status: u16) -> SendResult {
    match status {
        200..=299 => SendResult::Success,
        400..=499 => SendResult::Terminal,
        _ => SendResult::Retryable,
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub max_idle_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_idle_connections: 20,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("sendlane/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransportStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct TransportStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

impl TransportStats {
    fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_ms
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TransportStatsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let total_time = self.total_response_time_ms.load(Ordering::Relaxed);
        TransportStatsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_response_time: if total > 0 {
                Duration::from_millis(total_time / total)
            } else {
                Duration::ZERO
            },
        }
    }
}

/// Reference transport over reqwest. Owns connection-level retry up to the
/// request's `max_try_cnt`; business-level retry stays with the dispatcher.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    stats: Arc<TransportStats>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Self::builder_from(&config)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            config,
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    fn builder_from(config: &HttpTransportConfig) -> ClientBuilder {
        let mut builder = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(config.user_agent.clone());
        if config.enable_compression {
            builder = builder.gzip(true);
        }
        builder
    }

    /// The pooled client serves plain requests; TLS material or a redirect
    /// override forces a dedicated client for that request.
    fn client_for(&self, request: &TransportRequest) -> Result<Client, TransportError> {
        if request.socket.is_some() {
            // reqwest does not expose socket marking; the hint is carried
            // for transports that can honor it.
            debug!("socket TOS hint not applied by the HTTP adapter");
        }
        if request.tls.is_none() && !request.follow_redirects {
            return Ok(self.client.clone());
        }

        let mut builder = Self::builder_from(&self.config);
        builder = if request.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(10))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };

        if let Some(tls) = &request.tls {
            if tls.insecure_skip_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(ca_file) = &tls.ca_file {
                let pem = std::fs::read(ca_file).map_err(|e| {
                    TransportError::InvalidRequest(format!("cannot read CA file {ca_file}: {e}"))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    TransportError::InvalidRequest(format!("invalid CA certificate: {e}"))
                })?;
                builder = builder.add_root_certificate(cert);
            }
            if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
                let mut pem = std::fs::read(cert_file).map_err(|e| {
                    TransportError::InvalidRequest(format!(
                        "cannot read cert file {cert_file}: {e}"
                    ))
                })?;
                let key = std::fs::read(key_file).map_err(|e| {
                    TransportError::InvalidRequest(format!("cannot read key file {key_file}: {e}"))
                })?;
                pem.extend_from_slice(&key);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                    TransportError::InvalidRequest(format!("invalid client identity: {e}"))
                })?;
                builder = builder.identity(identity);
            }
        }

        builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("client build failed: {e}")))
    }

    fn header_map(request: &TransportRequest) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("bad header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("bad header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("bad method: {e}")))?;
        let url: Url = request
            .url()
            .parse()
            .map_err(|e| TransportError::InvalidRequest(format!("bad url: {e}")))?;
        let headers = Self::header_map(&request)?;
        let client = self.client_for(&request)?;
        let max_tries = request.max_try_cnt.max(1);

        let start = Instant::now();
        let mut attempt = 1u32;
        loop {
            let result = client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .timeout(request.timeout)
                .body(request.body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let response_headers = response
                        .headers()
                        .iter()
                        .filter_map(|(k, v)| {
                            v.to_str().ok().map(|v| (k.to_string(), v.to_string()))
                        })
                        .collect();
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| TransportError::Network(e.to_string()))?;
                    self.stats
                        .record_request((200..300).contains(&status), start.elapsed());
                    return Ok(TransportResponse {
                        status,
                        headers: response_headers,
                        body,
                    });
                }
                Err(e) if e.is_timeout() => {
                    self.stats.record_request(false, start.elapsed());
                    return Err(TransportError::Timeout);
                }
                Err(e) if e.is_connect() && attempt < max_tries => {
                    debug!(attempt, max_tries, error = %e, "connection attempt failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "transport request failed");
                    self.stats.record_request(false, start.elapsed());
                    return Err(TransportError::Network(e.to_string()));
                }
            }
        }
    }
}
