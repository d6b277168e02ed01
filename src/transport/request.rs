use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use url::form_urlencoded;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection-level retry budget owned by the transport itself. Business
/// retry (re-enqueueing the item) belongs to the dispatcher.
pub const DEFAULT_MAX_TRY_CNT: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub insecure_skip_verify: bool,
}

/// Socket-level traffic-class hint. The TOS byte carries DSCP in its top
/// six bits; the two ECN bits are set by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    tos: Option<u32>,
}

impl SocketOptions {
    pub fn from_dscp(dscp: i32) -> Self {
        let tos = (0..=63).contains(&dscp).then(|| (dscp as u32) << 2);
        Self { tos }
    }

    pub fn tos(&self) -> Option<u32> {
        self.tos
    }
}

/// The request value the dispatcher hands to a transport. Carries every
/// field the transport needs to place the call; nothing here refers back
/// to the queue.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub https: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub timeout: Duration,
    pub max_try_cnt: u32,
    pub follow_redirects: bool,
    pub tls: Option<TlsOptions>,
    pub socket: Option<SocketOptions>,
}

impl TransportRequest {
    pub fn new(
        method: impl Into<String>,
        https: bool,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            https,
            host: host.into(),
            port,
            path: path.into(),
            query: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_try_cnt: DEFAULT_MAX_TRY_CNT,
            follow_redirects: false,
            tls: None,
            socket: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_try_cnt(mut self, max_try_cnt: u32) -> Self {
        self.max_try_cnt = max_try_cnt.max(1);
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_socket(mut self, socket: SocketOptions) -> Self {
        self.socket = Some(socket);
        self
    }

    pub fn url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let mut url = format!("{scheme}://{}:{}{}", self.host, self.port, self.path);
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query);
        }
        url
    }
}

/// Renders a sorted, percent-encoded query string from parameters.
pub fn query_string(parameters: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(parameters)
        .finish()
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request cancelled before completion")]
    Cancelled,
}

/// External collaborator boundary. A transport guarantees exactly one
/// completion per accepted request; the dispatcher layers its own timeout
/// on top so a vanished response cannot wedge a queue's in-flight slot.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl std::future::Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_rendering_includes_scheme_port_and_query() {
        let request = TransportRequest::new("POST", true, "ingest.example.com", 443, "/v1/logs")
            .with_query("project=demo");
        assert_eq!(
            request.url(),
            "https://ingest.example.com:443/v1/logs?project=demo"
        );

        let plain = TransportRequest::new("GET", false, "localhost", 8080, "/health");
        assert_eq!(plain.url(), "http://localhost:8080/health");
    }

    #[test]
    fn query_string_is_sorted_and_encoded() {
        let mut params = BTreeMap::new();
        params.insert("b key".to_string(), "x/y".to_string());
        params.insert("a".to_string(), "1".to_string());
        assert_eq!(query_string(&params), "a=1&b+key=x%2Fy");
    }

    #[test]
    fn dscp_out_of_range_yields_no_tos() {
        assert_eq!(SocketOptions::from_dscp(10).tos(), Some(40));
        assert_eq!(SocketOptions::from_dscp(63).tos(), Some(252));
        assert_eq!(SocketOptions::from_dscp(64).tos(), None);
        assert_eq!(SocketOptions::from_dscp(-1).tos(), None);
    }

    #[test]
    fn max_try_cnt_has_a_floor_of_one() {
        let request = TransportRequest::new("POST", false, "h", 80, "/").with_max_try_cnt(0);
        assert_eq!(request.max_try_cnt, 1);
    }
}
