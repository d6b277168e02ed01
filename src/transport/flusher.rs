use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::http::classify_http_status;
use super::request::{
    DEFAULT_MAX_TRY_CNT, DEFAULT_REQUEST_TIMEOUT, TlsOptions, TransportError, TransportRequest,
    TransportResponse,
};
use crate::pipeline::{FlushError, Flusher, SendResult};
use crate::queue::{RawDataType, SenderQueueItem};

/// Header telling the consumer how to decode the body: one event group or
/// a list of them. Preserved across retries because it rides on the item.
pub const RAW_TYPE_HEADER: &str = "x-sendlane-raw-type";

#[derive(Debug, Clone)]
pub struct HttpFlusherConfig {
    pub name: String,
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
    /// Business-level retry budget for items sent to this destination.
    pub max_try_cnt: u32,
    /// Connection-level retry budget handed to the transport.
    pub connection_try_cnt: u32,
    pub follow_redirects: bool,
    pub tls: Option<TlsOptions>,
}

impl Default for HttpFlusherConfig {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            endpoint: "http://localhost:9600/v1/ingest".to_string(),
            headers: HashMap::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_try_cnt: 3,
            connection_try_cnt: DEFAULT_MAX_TRY_CNT,
            follow_redirects: false,
            tls: None,
        }
    }
}

/// The stock destination plugin: posts item payloads to a fixed HTTP
/// endpoint and classifies outcomes by status code.
pub struct HttpFlusher {
    config: HttpFlusherConfig,
    https: bool,
    host: String,
    port: u16,
    path: String,
    query: String,
}

impl HttpFlusher {
    pub fn new(config: HttpFlusherConfig) -> Result<Self, FlushError> {
        let url: Url = config
            .endpoint
            .parse()
            .map_err(|e| FlushError::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;
        let https = url.scheme() == "https";
        if !https && url.scheme() != "http" {
            return Err(FlushError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| FlushError::InvalidEndpoint("endpoint has no host".to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FlushError::InvalidEndpoint("endpoint has no port".to_string()))?;
        let path = url.path().to_string();
        let query = url.query().unwrap_or_default().to_string();
        Ok(Self {
            config,
            https,
            host,
            port,
            path,
            query,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

impl Flusher for HttpFlusher {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn build_request(&self, item: &SenderQueueItem) -> Result<TransportRequest, FlushError> {
        let mut request = TransportRequest::new("POST", self.https, &self.host, self.port, &self.path)
            .with_query(&self.query)
            .with_body(item.data().clone())
            .with_timeout(self.config.timeout)
            .with_max_try_cnt(self.config.connection_try_cnt)
            .with_follow_redirects(self.config.follow_redirects);
        for (name, value) in &self.config.headers {
            request = request.with_header(name, value);
        }
        if !request.headers.contains_key("content-type") {
            request = request.with_header("content-type", "application/octet-stream");
        }
        let raw_type = match item.kind() {
            RawDataType::EventGroup => "event-group",
            RawDataType::EventGroupList => "event-group-list",
        };
        request = request.with_header(RAW_TYPE_HEADER, raw_type);
        if let Some(tls) = &self.config.tls {
            request = request.with_tls(tls.clone());
        }
        Ok(request)
    }

    fn classify(&self, outcome: &Result<TransportResponse, TransportError>) -> SendResult {
        match outcome {
            Ok(response) => classify_http_status(response.status),
            Err(TransportError::Timeout) | Err(TransportError::Network(_)) => {
                SendResult::Retryable
            }
            Err(TransportError::InvalidRequest(_)) | Err(TransportError::Cancelled) => {
                SendResult::Terminal
            }
        }
    }

    fn max_try_count(&self) -> u32 {
        self.config.max_try_cnt
    }
}
