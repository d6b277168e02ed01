pub mod flusher;
pub mod http;
pub mod request;

pub use flusher::{HttpFlusher, HttpFlusherConfig, RAW_TYPE_HEADER};
pub use http::{
    HttpTransport, HttpTransportConfig, TransportStats, TransportStatsSnapshot,
    classify_http_status,
};
pub use request::{
    DEFAULT_MAX_TRY_CNT, DEFAULT_REQUEST_TIMEOUT, SocketOptions, TlsOptions, Transport,
    TransportError, TransportRequest, TransportResponse, query_string,
};
