use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::queue::SenderQueueItem;
use crate::transport::{TransportError, TransportRequest, TransportResponse};

#[derive(Error, Debug)]
pub enum FlushError {
    #[error("Invalid destination endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Request encoding failed: {0}")]
    Encode(String),
}

/// Outcome classification for a completed send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Success,
    Retryable,
    Terminal,
}

/// A processing configuration that produces queue items. Pipelines are
/// hot-swappable: the manager pins the old instance onto resident items
/// during an update, and teardown cancels the token so completions for
/// dead pipelines are suppressed.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    generation: u64,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, generation: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            generation,
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tears the pipeline down. In-flight sends complete normally, but
    /// their results are discarded and no further items are dispatched
    /// under this pipeline.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Destination capability: knows how to turn a queue item into a transport
/// request and how to interpret what came back. Implemented by destination
/// plugins; the stock HTTP implementation lives in `transport::flusher`.
pub trait Flusher: Send + Sync {
    fn name(&self) -> &str;

    fn build_request(&self, item: &SenderQueueItem) -> Result<TransportRequest, FlushError>;

    fn classify(&self, outcome: &Result<TransportResponse, TransportError>) -> SendResult;

    /// Business-level retry budget. An item whose attempt fails retryably
    /// with `try_count() >= max_try_count()` is dropped.
    fn max_try_count(&self) -> u32;
}

/// What the queue manager stores per key: the destination flusher and the
/// pipeline instance that currently owns the destination.
#[derive(Clone)]
pub struct QueueBinding {
    pub flusher: Arc<dyn Flusher>,
    pub pipeline: Arc<Pipeline>,
}

impl QueueBinding {
    pub fn new(flusher: Arc<dyn Flusher>, pipeline: Arc<Pipeline>) -> Self {
        Self { flusher, pipeline }
    }
}
