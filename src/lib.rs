#![deny(warnings, rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. QueueError in queue module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod config;
pub mod dispatch;
pub mod pipeline;
pub mod queue;
pub mod transport;

// Re-export main types for easy access
pub use config::DeliveryConfig;
pub use dispatch::{BackoffPolicy, DispatchConfig, FlushDispatcher, RetryConfig};
pub use pipeline::{Flusher, Pipeline, QueueBinding, SendResult};
pub use queue::{QueueCapacity, QueueError, QueueKey, QueueManager, RawDataType, SenderQueueItem};
pub use transport::{
    HttpFlusher, HttpFlusherConfig, HttpTransport, Transport, TransportError, TransportRequest,
    TransportResponse,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
